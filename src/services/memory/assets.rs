use std::path::{Path, PathBuf};

use async_trait::async_trait;
use uuid::Uuid;

use super::{blocking, copy_tree, now, resolve_inside, AssetRecord, MemoryBackend, MemoryState};
use crate::database::Transaction;
use crate::middleware::pagination::{paginate, PaginationResult};
use crate::services::assets::{
    Asset, AssetChanges, AssetListQuery, AssetMetadatum, AssetService, CloneAsset, CreateAsset, FileNode, FileTree,
    ModelReference, ZipDownload, ZipLocation,
};
use crate::services::categories::slugify;
use crate::services::users::User;
use crate::services::{ServiceError, ServiceResult};
use crate::middleware::validators::split_list;
use crate::types::{Action, AssetKind, SortOrder};

impl MemoryState {
    fn asset_index(&self, kind: AssetKind, owner: &str, name: &str) -> Option<usize> {
        self.assets.iter().position(|r| {
            r.asset.kind == kind && r.asset.owner.eq_ignore_ascii_case(owner) && r.asset.name == name
        })
    }

    fn can_read_asset(&self, asset: &Asset, user: Option<&User>) -> bool {
        !asset.private
            || self.can_read_owner(user, &asset.owner)
            || user
                .map(|u| self.has_permission(&u.username, &asset.uuid, Action::Read))
                .unwrap_or(false)
    }

    fn can_write_asset(&self, asset: &Asset, user: Option<&User>) -> bool {
        self.can_write_owner(user, &asset.owner)
            || user
                .map(|u| self.has_permission(&u.username, &asset.uuid, Action::Write))
                .unwrap_or(false)
    }

    fn readable_asset(&self, kind: AssetKind, owner: &str, name: &str, user: Option<&User>) -> ServiceResult<usize> {
        let idx = self
            .asset_index(kind, owner, name)
            .ok_or_else(|| ServiceError::not_found(format!("{} not found", kind.label())))?;
        if !self.can_read_asset(&self.assets[idx].asset, user) {
            return Err(ServiceError::forbidden(format!("Not authorized to access this {}", kind)));
        }
        Ok(idx)
    }

    fn writable_asset(&self, kind: AssetKind, owner: &str, name: &str, user: Option<&User>) -> ServiceResult<usize> {
        let idx = self.readable_asset(kind, owner, name, user)?;
        if !self.can_write_asset(&self.assets[idx].asset, user) {
            return Err(ServiceError::forbidden(format!("Not authorized to modify this {}", kind)));
        }
        Ok(idx)
    }
}

/// `tip` or a version number not newer than the current one
fn resolve_version(asset: &Asset, version: &str) -> ServiceResult<i64> {
    if version.is_empty() || version == "tip" {
        return Ok(asset.version);
    }
    match version.parse::<i64>() {
        Ok(v) if v >= 1 && v <= asset.version => Ok(v),
        _ => Err(ServiceError::not_found(format!("Version [{}] not found", version))),
    }
}

fn walk_tree(root: &Path, dir: &Path) -> std::io::Result<Vec<FileNode>> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    let mut nodes = Vec::new();
    for entry in entries {
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path.as_path());
        let children = if entry.file_type()?.is_dir() {
            walk_tree(root, &path)?
        } else {
            Vec::new()
        };
        nodes.push(FileNode {
            name: entry.file_name().to_string_lossy().into_owned(),
            path: format!("/{}", relative.to_string_lossy()),
            children,
        });
    }
    Ok(nodes)
}

/// Extract `<owner>/models/<name>` references from world files
fn scan_model_references(contents: &str) -> Vec<(String, String)> {
    let mut found = Vec::new();
    for segment in contents.split("<uri>").skip(1) {
        let uri = segment.split("</uri>").next().unwrap_or_default().trim();
        let parts: Vec<&str> = uri.trim_end_matches('/').split('/').collect();
        if let Some(pos) = parts.iter().position(|p| p.eq_ignore_ascii_case("models")) {
            if pos >= 1 && pos + 1 < parts.len() {
                let owner = parts[pos - 1].to_string();
                let name = parts[pos + 1].to_string();
                if !found.contains(&(owner.clone(), name.clone())) {
                    found.push((owner, name));
                }
            }
        }
    }
    found
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            collect_files(&entry.path(), out)?;
        } else {
            out.push(entry.path());
        }
    }
    Ok(())
}

#[async_trait]
impl AssetService for MemoryBackend {
    async fn list(
        &self,
        _tx: &mut dyn Transaction,
        kind: AssetKind,
        query: &AssetListQuery,
        user: Option<&User>,
    ) -> ServiceResult<(Vec<Asset>, PaginationResult)> {
        let state = self.state.read().await;
        let search = query.search.to_lowercase();
        let wanted: Vec<String> = query.categories.iter().map(|c| slugify(c)).collect();

        let mut matches: Vec<Asset> = state
            .assets
            .iter()
            .filter(|r| r.asset.kind == kind)
            .filter(|r| state.can_read_asset(&r.asset, user))
            .filter(|r| {
                query
                    .owner
                    .as_deref()
                    .map(|o| r.asset.owner.eq_ignore_ascii_case(o))
                    .unwrap_or(true)
            })
            .filter(|r| {
                query
                    .liked_by
                    .as_deref()
                    .map(|u| r.liked_by.contains(&u.to_lowercase()))
                    .unwrap_or(true)
            })
            .filter(|r| {
                wanted.is_empty() || r.asset.categories.iter().any(|c| wanted.contains(&slugify(c)))
            })
            .filter(|r| {
                search.is_empty()
                    || r.asset.name.to_lowercase().contains(&search)
                    || r.asset
                        .description
                        .as_deref()
                        .map(|d| d.to_lowercase().contains(&search))
                        .unwrap_or(false)
                    || r.asset.tags.iter().any(|t| t.to_lowercase().contains(&search))
            })
            .map(|r| r.asset.clone())
            .collect();

        match query.order.unwrap_or(SortOrder::Desc) {
            SortOrder::Asc => matches.sort_by_key(|a| a.id),
            SortOrder::Desc => matches.sort_by_key(|a| std::cmp::Reverse(a.id)),
        }
        Ok(paginate(matches, &query.pagination))
    }

    async fn get(
        &self,
        _tx: &mut dyn Transaction,
        kind: AssetKind,
        owner: &str,
        name: &str,
        user: Option<&User>,
    ) -> ServiceResult<Asset> {
        let state = self.state.read().await;
        let idx = state.readable_asset(kind, owner, name, user)?;
        Ok(state.assets[idx].asset.clone())
    }

    async fn file_tree(
        &self,
        _tx: &mut dyn Transaction,
        kind: AssetKind,
        owner: &str,
        name: &str,
        version: &str,
        user: Option<&User>,
    ) -> ServiceResult<FileTree> {
        let asset = {
            let state = self.state.read().await;
            let idx = state.readable_asset(kind, owner, name, user)?;
            state.assets[idx].asset.clone()
        };
        let version = resolve_version(&asset, version)?;
        let root = asset.location.clone();
        let nodes = blocking(move || walk_tree(&root, &root)).await?;
        Ok(FileTree {
            name: asset.name,
            owner: asset.owner,
            version,
            file_tree: nodes,
        })
    }

    async fn get_file(
        &self,
        _tx: &mut dyn Transaction,
        kind: AssetKind,
        owner: &str,
        name: &str,
        path: &str,
        version: &str,
        user: Option<&User>,
    ) -> ServiceResult<(Vec<u8>, i64)> {
        let asset = {
            let state = self.state.read().await;
            let idx = state.readable_asset(kind, owner, name, user)?;
            state.assets[idx].asset.clone()
        };
        let version = resolve_version(&asset, version)?;
        let file = resolve_inside(&asset.location, path)
            .ok_or_else(|| ServiceError::Invalid(format!("Invalid file path [{}]", path)))?;
        match tokio::fs::read(&file).await {
            Ok(bytes) => Ok((bytes, version)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ServiceError::not_found(format!("File [{}] not found", path)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn download_zip(
        &self,
        tx: &mut dyn Transaction,
        kind: AssetKind,
        owner: &str,
        name: &str,
        version: &str,
        user: Option<&User>,
        user_agent: Option<&str>,
    ) -> ServiceResult<ZipDownload> {
        let mut state = self.write(tx).await;
        let idx = state.readable_asset(kind, owner, name, user)?;
        let record = &mut state.assets[idx];
        let version = resolve_version(&record.asset, version)?;
        record.asset.downloads += 1;
        tracing::debug!(
            "{} {}/{} v{} downloaded by {}",
            kind,
            record.asset.owner,
            record.asset.name,
            version,
            user_agent.unwrap_or("unknown agent")
        );

        let archive = record
            .asset
            .location
            .with_file_name(format!("{}-v{}.zip", record.asset.uuid, version));
        let location = if tokio::fs::try_exists(&archive).await.unwrap_or(false) {
            ZipLocation::Local(archive)
        } else {
            ZipLocation::Remote(format!(
                "{}/{}/{}/{}/{}.zip",
                self.download_base_url,
                record.asset.owner,
                kind.plural(),
                record.asset.name,
                version
            ))
        };
        Ok(ZipDownload {
            location,
            version,
            uuid: record.asset.uuid.clone(),
        })
    }

    async fn create(
        &self,
        tx: &mut dyn Transaction,
        kind: AssetKind,
        owner: &str,
        input: &CreateAsset,
        metadata: Vec<AssetMetadatum>,
        staged: &Path,
        creator: &User,
    ) -> ServiceResult<Asset> {
        self.sync_user(owner).await?;
        let mut state = self.write(tx).await;
        let owner = state
            .owner_name(owner)
            .ok_or_else(|| ServiceError::not_found(format!("Owner [{}] not found", owner)))?;
        if !state.can_write_owner(Some(creator), &owner) {
            return Err(ServiceError::forbidden(format!("Not authorized to create {} for {}", kind.plural(), owner)));
        }
        if state.asset_index(kind, &owner, &input.name).is_some() {
            return Err(ServiceError::AlreadyExists(format!("{} [{}] already exists", kind.label(), input.name)));
        }

        let uuid = Uuid::new_v4().to_string();
        let location = self.asset_location(&owner, kind.plural(), &uuid);
        let (src, dst) = (staged.to_path_buf(), location.clone());
        let filesize = match blocking(move || copy_tree(&src, &dst)).await {
            Ok(size) => size,
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&location).await;
                return Err(e);
            }
        };

        let stamp = now();
        let asset = Asset {
            id: state.next_id(),
            uuid,
            kind,
            name: input.name.clone(),
            owner,
            creator: creator.username.clone(),
            description: input.description.clone(),
            tags: input.tag_list(),
            categories: input.category_list(),
            license_id: input.license,
            permission: input.permission,
            private: input.private.unwrap_or(input.permission == 1),
            version: 1,
            likes: 0,
            downloads: 0,
            filesize,
            metadata,
            location,
            upload_date: stamp,
            modify_date: stamp,
        };
        state.assets.push(AssetRecord {
            asset: asset.clone(),
            liked_by: Default::default(),
            reports: Vec::new(),
        });
        Ok(asset)
    }

    async fn clone_asset(
        &self,
        tx: &mut dyn Transaction,
        kind: AssetKind,
        owner: &str,
        name: &str,
        input: &CloneAsset,
        user: &User,
    ) -> ServiceResult<Asset> {
        self.sync_user(input.owner.as_deref().unwrap_or(&user.username)).await?;
        let mut state = self.write(tx).await;
        let idx = state.readable_asset(kind, owner, name, Some(user))?;
        let source = state.assets[idx].asset.clone();

        let dest_owner = input.owner.as_deref().unwrap_or(&user.username);
        let dest_owner = state
            .owner_name(dest_owner)
            .ok_or_else(|| ServiceError::not_found(format!("Owner [{}] not found", dest_owner)))?;
        if !state.can_write_owner(Some(user), &dest_owner) {
            return Err(ServiceError::forbidden(format!("Not authorized to create {} for {}", kind.plural(), dest_owner)));
        }
        let dest_name = input.name.clone().unwrap_or_else(|| source.name.clone());
        if state.asset_index(kind, &dest_owner, &dest_name).is_some() {
            return Err(ServiceError::AlreadyExists(format!("{} [{}] already exists", kind.label(), dest_name)));
        }

        let uuid = Uuid::new_v4().to_string();
        let location = self.asset_location(&dest_owner, kind.plural(), &uuid);
        let (src, dst) = (source.location.clone(), location.clone());
        if let Err(e) = blocking(move || copy_tree(&src, &dst)).await {
            let _ = tokio::fs::remove_dir_all(&location).await;
            return Err(e);
        }

        let stamp = now();
        let clone = Asset {
            id: state.next_id(),
            uuid,
            name: dest_name,
            owner: dest_owner,
            creator: user.username.clone(),
            private: input.private.unwrap_or(source.private),
            version: 1,
            likes: 0,
            downloads: 0,
            location,
            upload_date: stamp,
            modify_date: stamp,
            ..source
        };
        state.assets.push(AssetRecord {
            asset: clone.clone(),
            liked_by: Default::default(),
            reports: Vec::new(),
        });
        Ok(clone)
    }

    async fn update(
        &self,
        tx: &mut dyn Transaction,
        kind: AssetKind,
        owner: &str,
        name: &str,
        changes: AssetChanges<'_>,
        user: Option<&User>,
    ) -> ServiceResult<Asset> {
        let mut state = self.write(tx).await;
        let idx = state.writable_asset(kind, owner, name, user)?;

        if let Some(staged) = changes.new_files {
            let location = state.assets[idx].asset.location.clone();
            let src = staged.to_path_buf();
            let size = blocking(move || {
                if location.exists() {
                    std::fs::remove_dir_all(&location)?;
                }
                copy_tree(&src, &location)
            })
            .await?;
            let asset = &mut state.assets[idx].asset;
            asset.filesize = size;
            asset.version += 1;
        }

        let asset = &mut state.assets[idx].asset;
        let fields = changes.fields;
        if let Some(description) = fields.description {
            asset.description = Some(description);
        }
        if let Some(tags) = fields.tags {
            asset.tags = split_list(&tags);
        }
        if let Some(categories) = fields.categories {
            asset.categories = split_list(&categories);
        }
        if let Some(private) = fields.private {
            asset.private = private;
        }
        if let Some(metadata) = changes.metadata {
            asset.metadata = metadata;
        }
        asset.modify_date = now();
        Ok(asset.clone())
    }

    async fn remove(
        &self,
        tx: &mut dyn Transaction,
        kind: AssetKind,
        owner: &str,
        name: &str,
        user: &User,
    ) -> ServiceResult<Asset> {
        let mut state = self.write(tx).await;
        let idx = state.writable_asset(kind, owner, name, Some(user))?;
        Ok(state.assets.remove(idx).asset)
    }

    async fn like(
        &self,
        tx: &mut dyn Transaction,
        kind: AssetKind,
        owner: &str,
        name: &str,
        user: &User,
    ) -> ServiceResult<i64> {
        let mut state = self.write(tx).await;
        let idx = state.readable_asset(kind, owner, name, Some(user))?;
        let record = &mut state.assets[idx];
        if !record.liked_by.insert(user.username.to_lowercase()) {
            return Err(ServiceError::AlreadyExists(format!("{} already liked", kind.label())));
        }
        record.asset.likes = record.liked_by.len() as i64;
        Ok(record.asset.likes)
    }

    async fn unlike(
        &self,
        tx: &mut dyn Transaction,
        kind: AssetKind,
        owner: &str,
        name: &str,
        user: &User,
    ) -> ServiceResult<i64> {
        let mut state = self.write(tx).await;
        let idx = state.readable_asset(kind, owner, name, Some(user))?;
        let record = &mut state.assets[idx];
        if !record.liked_by.remove(&user.username.to_lowercase()) {
            return Err(ServiceError::not_found(format!("{} was not liked", kind.label())));
        }
        record.asset.likes = record.liked_by.len() as i64;
        Ok(record.asset.likes)
    }

    async fn report(
        &self,
        tx: &mut dyn Transaction,
        kind: AssetKind,
        owner: &str,
        name: &str,
        reason: &str,
    ) -> ServiceResult<()> {
        let mut state = self.write(tx).await;
        let idx = state
            .asset_index(kind, owner, name)
            .ok_or_else(|| ServiceError::not_found(format!("{} not found", kind.label())))?;
        state.assets[idx].reports.push(reason.to_string());
        tracing::info!("{} {}/{} reported", kind, owner, name);
        Ok(())
    }

    async fn move_to(
        &self,
        tx: &mut dyn Transaction,
        kind: AssetKind,
        owner: &str,
        name: &str,
        dest_owner: &str,
    ) -> ServiceResult<Asset> {
        self.sync_user(dest_owner).await?;
        let mut state = self.write(tx).await;
        let idx = state
            .asset_index(kind, owner, name)
            .ok_or_else(|| ServiceError::not_found(format!("{} not found", kind.label())))?;
        let dest_owner = state
            .owner_name(dest_owner)
            .ok_or_else(|| ServiceError::not_found(format!("Owner [{}] not found", dest_owner)))?;
        if state.asset_index(kind, &dest_owner, name).is_some() {
            return Err(ServiceError::AlreadyExists(format!(
                "{} [{}] already exists for {}",
                kind.label(),
                name,
                dest_owner
            )));
        }
        let asset = &mut state.assets[idx].asset;
        asset.owner = dest_owner;
        asset.modify_date = now();
        Ok(asset.clone())
    }

    async fn model_references(
        &self,
        _tx: &mut dyn Transaction,
        owner: &str,
        world: &str,
        version: &str,
        user: Option<&User>,
    ) -> ServiceResult<Vec<ModelReference>> {
        let asset = {
            let state = self.state.read().await;
            let idx = state.readable_asset(AssetKind::World, owner, world, user)?;
            state.assets[idx].asset.clone()
        };
        resolve_version(&asset, version)?;

        let root = asset.location.clone();
        let contents = blocking(move || {
            let mut files = Vec::new();
            collect_files(&root, &mut files)?;
            let mut text = String::new();
            for file in files {
                if let Ok(s) = std::fs::read_to_string(&file) {
                    text.push_str(&s);
                }
            }
            Ok(text)
        })
        .await?;

        let state = self.state.read().await;
        Ok(scan_model_references(&contents)
            .into_iter()
            .map(|(owner, name)| {
                let version = state
                    .asset_index(AssetKind::Model, &owner, &name)
                    .map(|i| state.assets[i].asset.version)
                    .unwrap_or(0);
                ModelReference { owner, name, version }
            })
            .collect())
    }
}
