//! Multipart form buffering and staging of uploaded files.
//!
//! Uploads are written into a fresh temporary directory under the configured
//! staging root. Every path is checked before the first byte is written, so a
//! rejected batch leaves nothing behind; the directory itself is removed when
//! the [`StagedUpload`] is dropped.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use axum::body::Bytes;
use axum::extract::Multipart;
use tempfile::TempDir;
use thiserror::Error;

use crate::config::StorageConfig;
use crate::error::ApiError;

/// Path segments that may never appear in an uploaded file name
const DENIED_SEGMENTS: &[&str] = &[
    ".git",
    ".gitconfig",
    ".gitignore",
    ".hg",
    ".hgignore",
    ".hgrc",
    ".hgtags",
    "..",
];

#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Full file name from the part's `Content-Disposition`, folders included
    pub path: String,
    pub contents: Bytes,
}

impl UploadedFile {
    pub fn new(path: impl Into<String>, contents: impl Into<Bytes>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }
}

/// A fully buffered multipart body
#[derive(Debug, Default)]
pub struct MultipartForm {
    fields: Vec<(String, String)>,
    files: Vec<(String, UploadedFile)>,
}

impl MultipartForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await.map_err(malformed)? {
            let name = field.name().unwrap_or_default().to_string();
            match field.file_name().map(str::to_string) {
                Some(path) => {
                    let contents = field.bytes().await.map_err(malformed)?;
                    form.files.push((name, UploadedFile { path, contents }));
                }
                None => {
                    let value = field.text().await.map_err(malformed)?;
                    form.fields.push((name, value));
                }
            }
        }
        Ok(form)
    }

    /// Text fields in submission order, suitable for [`Binder::bind_form`](super::binder::Binder::bind_form)
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn values(&self, key: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Files under `file`, or `file[]` when no `file` part was sent
    pub fn files(&self) -> Vec<UploadedFile> {
        let under = |key: &str| -> Vec<UploadedFile> {
            self.files
                .iter()
                .filter(|(k, _)| k == key)
                .map(|(_, f)| f.clone())
                .collect()
        };
        let files = under("file");
        if files.is_empty() {
            under("file[]")
        } else {
            files
        }
    }

    pub fn push_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    pub fn push_file(&mut self, name: impl Into<String>, file: UploadedFile) {
        self.files.push((name.into(), file));
    }
}

fn malformed(err: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::invalid_form("Unable to read multipart form", vec![err.body_text()])
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("No files were submitted")]
    MissingFiles,

    #[error("Invalid file name {0}")]
    InvalidPath(String),

    #[error("Duplicate file {0}")]
    Duplicate(String),

    #[error("Unable to create directory: {0}")]
    CreatingDir(io::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<StageError> for ApiError {
    fn from(err: StageError) -> Self {
        match err {
            StageError::MissingFiles => ApiError::MissingFiles("No files were submitted".to_string()),
            StageError::InvalidPath(path) => ApiError::invalid_form("Invalid file name", vec![path]),
            StageError::Duplicate(path) => ApiError::DuplicateFile {
                message: "Duplicate file".to_string(),
                path,
            },
            StageError::CreatingDir(e) => {
                tracing::error!("Failed to create staging directory: {}", e);
                ApiError::CreatingDir("Unable to create directory".to_string())
            }
            StageError::Io(e) => {
                tracing::error!("Failed to stage upload: {}", e);
                ApiError::internal_server_error("Unable to store uploaded files")
            }
        }
    }
}

/// The folder every file lives under, taken from the first file's first
/// segment. Returned with its trailing `/` (and leading `/` if present).
pub fn common_root(files: &[UploadedFile]) -> Option<String> {
    let first = &files.first()?.path;
    let trimmed = first.strip_prefix('/').unwrap_or(first);
    let (segment, _) = trimmed.split_once('/')?;
    if segment.is_empty() {
        return None;
    }
    let root = if first.starts_with('/') {
        format!("/{}/", segment)
    } else {
        format!("{}/", segment)
    };
    files.iter().all(|f| f.path.starts_with(&root)).then_some(root)
}

fn is_denied(path: &str) -> bool {
    path.split('/').any(|segment| DENIED_SEGMENTS.contains(&segment))
}

/// Write `files` under `dir`, stripping their common folder when
/// `flatten_root` is set.
pub fn populate_dir(files: &[UploadedFile], flatten_root: bool, dir: &Path) -> Result<(), StageError> {
    if files.is_empty() {
        return Err(StageError::MissingFiles);
    }
    let root = if flatten_root { common_root(files) } else { None };

    let mut planned: Vec<(PathBuf, &UploadedFile)> = Vec::with_capacity(files.len());
    let mut seen = HashSet::new();
    for file in files {
        if file.path.is_empty() {
            continue;
        }
        if is_denied(&file.path) {
            return Err(StageError::InvalidPath(file.path.clone()));
        }
        let relative = match &root {
            Some(root) => &file.path[root.len()..],
            None => file.path.as_str(),
        };
        let relative = relative.trim_start_matches('/');
        if relative.is_empty() {
            continue;
        }
        let dest = dir.join(relative);
        if !seen.insert(dest.clone()) {
            return Err(StageError::Duplicate(dest.to_string_lossy().into_owned()));
        }
        planned.push((dest, file));
    }

    for (dest, file) in planned {
        if dest.exists() {
            return Err(StageError::Duplicate(dest.to_string_lossy().into_owned()));
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(StageError::CreatingDir)?;
        }
        std::fs::write(&dest, &file.contents)?;
    }
    Ok(())
}

/// Uploaded files copied into a temporary directory, removed on drop
#[derive(Debug)]
pub struct StagedUpload {
    dir: TempDir,
}

impl StagedUpload {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

#[derive(Debug, Clone)]
pub struct Stager {
    root: PathBuf,
}

impl Stager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(storage: &StorageConfig) -> Self {
        Self::new(storage.staging_dir.clone())
    }

    /// Stage `files` into a new temporary directory. Nothing is created when
    /// no files were sent.
    pub async fn stage(&self, files: Vec<UploadedFile>, flatten_root: bool) -> Result<StagedUpload, StageError> {
        if files.is_empty() {
            return Err(StageError::MissingFiles);
        }
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&root).map_err(StageError::CreatingDir)?;
            let dir = tempfile::Builder::new()
                .prefix("upload-")
                .tempdir_in(&root)
                .map_err(StageError::CreatingDir)?;
            populate_dir(&files, flatten_root, dir.path())?;
            tracing::debug!("Staged {} files in {}", files.len(), dir.path().display());
            Ok(StagedUpload { dir })
        })
        .await
        .map_err(|e| StageError::Io(io::Error::new(io::ErrorKind::Other, e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(paths: &[&str]) -> Vec<UploadedFile> {
        paths
            .iter()
            .map(|p| UploadedFile::new(*p, format!("contents of {}", p)))
            .collect()
    }

    fn listing(dir: &Path) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack = vec![dir.to_path_buf()];
        while let Some(current) = stack.pop() {
            for entry in std::fs::read_dir(&current).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    out.push(path.strip_prefix(dir).unwrap().to_string_lossy().into_owned());
                }
            }
        }
        out.sort();
        out
    }

    #[test]
    fn flattens_common_root() {
        let dir = tempfile::tempdir().unwrap();
        let batch = files(&["rover/model.sdf", "rover/meshes/body.dae", "rover/model.config"]);
        populate_dir(&batch, true, dir.path()).unwrap();
        assert_eq!(listing(dir.path()), vec!["meshes/body.dae", "model.config", "model.sdf"]);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("model.sdf")).unwrap(),
            "contents of rover/model.sdf"
        );
    }

    #[test]
    fn keeps_root_when_not_shared_or_not_requested() {
        let dir = tempfile::tempdir().unwrap();
        populate_dir(&files(&["rover/model.sdf", "other/model.config"]), true, dir.path()).unwrap();
        assert_eq!(listing(dir.path()), vec!["other/model.config", "rover/model.sdf"]);

        let dir = tempfile::tempdir().unwrap();
        populate_dir(&files(&["rover/model.sdf"]), false, dir.path()).unwrap();
        assert_eq!(listing(dir.path()), vec!["rover/model.sdf"]);
    }

    #[test]
    fn leading_slash_root() {
        assert_eq!(
            common_root(&files(&["/rover/model.sdf", "/rover/a.dae"])).as_deref(),
            Some("/rover/")
        );
        assert_eq!(common_root(&files(&["model.sdf", "rover/a.dae"])), None);
    }

    #[test]
    fn denylisted_segment_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let batch = files(&["rover/model.sdf", "rover/.git/config"]);
        let err = populate_dir(&batch, true, dir.path()).unwrap_err();
        assert!(matches!(err, StageError::InvalidPath(ref p) if p == "rover/.git/config"));
        assert!(listing(dir.path()).is_empty());

        let err = populate_dir(&files(&["../escape.txt"]), false, dir.path()).unwrap_err();
        assert!(matches!(err, StageError::InvalidPath(_)));
    }

    #[test]
    fn duplicate_destination_is_rejected_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let batch = vec![
            UploadedFile::new("rover/model.sdf", "first"),
            UploadedFile::new("rover/model.sdf", "second"),
        ];
        let err = populate_dir(&batch, true, dir.path()).unwrap_err();
        assert!(matches!(err, StageError::Duplicate(_)));
        assert!(listing(dir.path()).is_empty());
    }

    #[test]
    fn existing_destination_is_a_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("model.sdf"), "already here").unwrap();
        let err = populate_dir(&files(&["model.sdf"]), false, dir.path()).unwrap_err();
        assert!(matches!(err, StageError::Duplicate(_)));
        assert_eq!(std::fs::read_to_string(dir.path().join("model.sdf")).unwrap(), "already here");
    }

    #[tokio::test]
    async fn no_files_creates_no_directory() {
        let root = tempfile::tempdir().unwrap();
        let staging = root.path().join("staging");
        let stager = Stager::new(&staging);
        let err = stager.stage(Vec::new(), true).await.unwrap_err();
        assert!(matches!(err, StageError::MissingFiles));
        assert!(!staging.exists());

        let api: ApiError = err.into();
        assert_eq!(api.error_code(), "FORM_MISSING_FILES");
    }

    #[tokio::test]
    async fn staged_directory_is_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let stager = Stager::new(root.path());
        let staged = stager.stage(files(&["model.sdf"]), true).await.unwrap();
        let path = staged.path().to_path_buf();
        assert!(path.join("model.sdf").exists());
        drop(staged);
        assert!(!path.exists());
    }

    #[test]
    fn file_field_takes_precedence() {
        let mut form = MultipartForm::default();
        form.push_file("file[]", UploadedFile::new("a.sdf", "a"));
        assert_eq!(form.files().len(), 1);
        form.push_file("file", UploadedFile::new("b.sdf", "b"));
        let chosen = form.files();
        assert_eq!(chosen.len(), 1);
        assert_eq!(chosen[0].path, "b.sdf");
    }
}
