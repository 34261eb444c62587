// handlers/files.rs - individual file downloads shared by models, worlds and collections
use axum::response::Response;

use crate::error::ApiError;
use crate::middleware::response::attachment;
use crate::middleware::RequestContext;

/// Cleaned `path` and the requested `version` of a file route
pub fn file_request(ctx: &RequestContext) -> Result<(String, String), ApiError> {
    let version = ctx
        .params
        .get("version")
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| ApiError::not_found("Version not found"))?;
    let path = ctx.params.get("path").map(String::as_str).unwrap_or_default();
    Ok((clean_path(path), version))
}

/// Lexically normalize a relative path: `.` segments and empty segments are
/// dropped and `..` consumes its parent. A `..` that would climb above the
/// root is kept so the storage layer rejects it.
pub fn clean_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }
    segments.join("/")
}

pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Serve file contents as an attachment named after the last path segment
pub fn download(contents: Vec<u8>, path: &str, version: i64) -> Response {
    attachment(contents, file_name(path), version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_paths() {
        assert_eq!(clean_path("/meshes/./base.dae"), "meshes/base.dae");
        assert_eq!(clean_path("meshes/../model.sdf"), "model.sdf");
        assert_eq!(clean_path("../../etc/passwd"), "../../etc/passwd");
        assert_eq!(clean_path("a//b/"), "a/b");
    }

    #[test]
    fn attachment_name_is_last_segment() {
        assert_eq!(file_name("meshes/base.dae"), "base.dae");
        assert_eq!(file_name("model.sdf"), "model.sdf");
    }
}
