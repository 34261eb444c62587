use std::path::Path;

use async_trait::async_trait;
use uuid::Uuid;

use super::{blocking, copy_tree, now, resolve_inside, CollectionRecord, MemoryBackend, MemoryState};
use crate::database::Transaction;
use crate::middleware::pagination::{paginate, PaginationRequest, PaginationResult};
use crate::services::collections::{
    CloneCollection, Collection, CollectionAsset, CollectionListQuery, CollectionService, CreateCollection,
    NameOwnerPair, UpdateCollection,
};
use crate::services::users::User;
use crate::services::{ServiceError, ServiceResult};
use crate::types::{Action, AssetKind, SortOrder};

impl MemoryState {
    fn collection_index(&self, owner: &str, name: &str) -> Option<usize> {
        self.collections
            .iter()
            .position(|r| r.collection.owner.eq_ignore_ascii_case(owner) && r.collection.name == name)
    }

    fn can_read_collection(&self, collection: &Collection, user: Option<&User>) -> bool {
        !collection.private
            || self.can_read_owner(user, &collection.owner)
            || user
                .map(|u| self.has_permission(&u.username, &collection.uuid, Action::Read))
                .unwrap_or(false)
    }

    fn can_write_collection(&self, collection: &Collection, user: Option<&User>) -> bool {
        self.can_write_owner(user, &collection.owner)
            || user
                .map(|u| self.has_permission(&u.username, &collection.uuid, Action::Write))
                .unwrap_or(false)
    }

    fn readable_collection(&self, owner: &str, name: &str, user: Option<&User>) -> ServiceResult<usize> {
        let idx = self
            .collection_index(owner, name)
            .ok_or_else(|| ServiceError::not_found(format!("Collection [{}] not found", name)))?;
        if !self.can_read_collection(&self.collections[idx].collection, user) {
            return Err(ServiceError::forbidden("Not authorized to access this collection"));
        }
        Ok(idx)
    }

    fn writable_collection(&self, owner: &str, name: &str, user: Option<&User>) -> ServiceResult<usize> {
        let idx = self.readable_collection(owner, name, user)?;
        if !self.can_write_collection(&self.collections[idx].collection, user) {
            return Err(ServiceError::forbidden("Not authorized to modify this collection"));
        }
        Ok(idx)
    }

    fn new_collection(&mut self, name: String, owner: String, creator: &User, location: std::path::PathBuf) -> Collection {
        let stamp = now();
        Collection {
            id: self.next_id(),
            uuid: String::new(),
            name,
            owner,
            creator: creator.username.clone(),
            description: None,
            private: false,
            thumbnails: Vec::new(),
            location,
            created_at: stamp,
            updated_at: stamp,
        }
    }
}

/// Files stored under `thumbnails/` become the collection's thumbnail urls
fn list_thumbnails(location: &Path) -> std::io::Result<Vec<String>> {
    let dir = location.join("thumbnails");
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names: Vec<String> = std::fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .map(|e| format!("/thumbnails/{}", e.file_name().to_string_lossy()))
        .collect();
    names.sort();
    Ok(names)
}

#[async_trait]
impl CollectionService for MemoryBackend {
    async fn list(
        &self,
        _tx: &mut dyn Transaction,
        query: &CollectionListQuery,
        user: Option<&User>,
    ) -> ServiceResult<(Vec<Collection>, PaginationResult)> {
        let state = self.state.read().await;
        let search = query.search.to_lowercase();
        let mut matches: Vec<Collection> = state
            .collections
            .iter()
            .map(|r| &r.collection)
            .filter(|c| state.can_read_collection(c, user))
            .filter(|c| !query.extend || state.can_write_collection(c, user))
            .filter(|c| {
                query
                    .owner
                    .as_deref()
                    .map(|o| c.owner.eq_ignore_ascii_case(o))
                    .unwrap_or(true)
            })
            .filter(|c| {
                search.is_empty()
                    || c.name.to_lowercase().contains(&search)
                    || c.description
                        .as_deref()
                        .map(|d| d.to_lowercase().contains(&search))
                        .unwrap_or(false)
            })
            .cloned()
            .collect();

        match query.order.unwrap_or(SortOrder::Desc) {
            SortOrder::Asc => matches.sort_by_key(|c| c.id),
            SortOrder::Desc => matches.sort_by_key(|c| std::cmp::Reverse(c.id)),
        }
        Ok(paginate(matches, &query.pagination))
    }

    async fn get(
        &self,
        _tx: &mut dyn Transaction,
        owner: &str,
        name: &str,
        user: Option<&User>,
    ) -> ServiceResult<Collection> {
        let state = self.state.read().await;
        let idx = state.readable_collection(owner, name, user)?;
        Ok(state.collections[idx].collection.clone())
    }

    async fn create(
        &self,
        tx: &mut dyn Transaction,
        input: &CreateCollection,
        user: &User,
    ) -> ServiceResult<Collection> {
        self.sync_user(input.owner.as_deref().unwrap_or(&user.username)).await?;
        let mut state = self.write(tx).await;
        let requested = input.owner.as_deref().unwrap_or(&user.username);
        let owner = state
            .owner_name(requested)
            .ok_or_else(|| ServiceError::not_found(format!("Owner [{}] not found", requested)))?;
        if !state.can_write_owner(Some(user), &owner) {
            return Err(ServiceError::forbidden(format!("Not authorized to create collections for {}", owner)));
        }
        if state.collection_index(&owner, &input.name).is_some() {
            return Err(ServiceError::AlreadyExists(format!("Collection [{}] already exists", input.name)));
        }

        let uuid = Uuid::new_v4().to_string();
        let location = self.asset_location(&owner, "collections", &uuid);
        tokio::fs::create_dir_all(&location).await?;

        let mut collection = state.new_collection(input.name.clone(), owner, user, location);
        collection.uuid = uuid;
        collection.description = input.description.clone();
        collection.private = input.private.unwrap_or(false);
        state.collections.push(CollectionRecord {
            collection: collection.clone(),
            assets: Vec::new(),
            version: 1,
        });
        Ok(collection)
    }

    async fn clone_collection(
        &self,
        tx: &mut dyn Transaction,
        owner: &str,
        name: &str,
        input: &CloneCollection,
        user: &User,
    ) -> ServiceResult<Collection> {
        self.sync_user(input.owner.as_deref().unwrap_or(&user.username)).await?;
        let mut state = self.write(tx).await;
        let idx = state.readable_collection(owner, name, Some(user))?;
        let source = state.collections[idx].collection.clone();
        let source_assets = state.collections[idx].assets.clone();

        let requested = input.owner.as_deref().unwrap_or(&user.username);
        let dest_owner = state
            .owner_name(requested)
            .ok_or_else(|| ServiceError::not_found(format!("Owner [{}] not found", requested)))?;
        if !state.can_write_owner(Some(user), &dest_owner) {
            return Err(ServiceError::forbidden(format!("Not authorized to create collections for {}", dest_owner)));
        }
        let dest_name = input.name.clone().unwrap_or_else(|| source.name.clone());
        if state.collection_index(&dest_owner, &dest_name).is_some() {
            return Err(ServiceError::AlreadyExists(format!("Collection [{}] already exists", dest_name)));
        }

        let uuid = Uuid::new_v4().to_string();
        let location = self.asset_location(&dest_owner, "collections", &uuid);
        let (src, dst) = (source.location.clone(), location.clone());
        blocking(move || copy_tree(&src, &dst)).await?;

        let mut collection = state.new_collection(dest_name, dest_owner, user, location);
        collection.uuid = uuid;
        collection.description = source.description.clone();
        collection.private = input.private.unwrap_or(source.private);
        collection.thumbnails = source.thumbnails.clone();
        state.collections.push(CollectionRecord {
            collection: collection.clone(),
            assets: source_assets,
            version: 1,
        });
        Ok(collection)
    }

    async fn update(
        &self,
        tx: &mut dyn Transaction,
        owner: &str,
        name: &str,
        input: &UpdateCollection,
        new_files: Option<&Path>,
        user: Option<&User>,
    ) -> ServiceResult<Collection> {
        let mut state = self.write(tx).await;
        let idx = state.writable_collection(owner, name, user)?;

        if let Some(staged) = new_files {
            let location = state.collections[idx].collection.location.clone();
            let src = staged.to_path_buf();
            let thumbnails = blocking(move || {
                if location.exists() {
                    std::fs::remove_dir_all(&location)?;
                }
                copy_tree(&src, &location)?;
                list_thumbnails(&location)
            })
            .await?;
            let record = &mut state.collections[idx];
            record.collection.thumbnails = thumbnails;
            record.version += 1;
        }

        let collection = &mut state.collections[idx].collection;
        if let Some(description) = &input.description {
            collection.description = Some(description.clone());
        }
        if let Some(private) = input.private {
            collection.private = private;
        }
        collection.updated_at = now();
        Ok(collection.clone())
    }

    async fn remove(&self, tx: &mut dyn Transaction, owner: &str, name: &str, user: &User) -> ServiceResult<()> {
        let mut state = self.write(tx).await;
        let idx = state.writable_collection(owner, name, Some(user))?;
        state.collections.remove(idx);
        Ok(())
    }

    async fn assets(
        &self,
        _tx: &mut dyn Transaction,
        page: &PaginationRequest,
        owner: &str,
        name: &str,
        kind: AssetKind,
        user: Option<&User>,
    ) -> ServiceResult<(Vec<CollectionAsset>, PaginationResult)> {
        let state = self.state.read().await;
        let idx = state.readable_collection(owner, name, user)?;
        let members: Vec<CollectionAsset> = state.collections[idx]
            .assets
            .iter()
            .filter(|a| a.kind == kind)
            .cloned()
            .collect();
        Ok(paginate(members, page))
    }

    async fn add_asset(
        &self,
        tx: &mut dyn Transaction,
        owner: &str,
        name: &str,
        asset: &NameOwnerPair,
        kind: AssetKind,
        user: &User,
    ) -> ServiceResult<CollectionAsset> {
        let mut state = self.write(tx).await;
        let idx = state.writable_collection(owner, name, Some(user))?;

        let target = state
            .assets
            .iter()
            .map(|r| &r.asset)
            .find(|a| a.kind == kind && a.owner.eq_ignore_ascii_case(&asset.owner) && a.name == asset.name)
            .ok_or_else(|| ServiceError::not_found(format!("{} [{}] not found", kind.label(), asset.name)))?;
        let entry = CollectionAsset {
            asset_name: target.name.clone(),
            asset_owner: target.owner.clone(),
            kind,
        };

        let record = &mut state.collections[idx];
        if record.assets.contains(&entry) {
            return Err(ServiceError::AlreadyExists(format!(
                "{} [{}] is already in the collection",
                kind.label(),
                entry.asset_name
            )));
        }
        record.assets.push(entry.clone());
        record.collection.updated_at = now();
        Ok(entry)
    }

    async fn remove_asset(
        &self,
        tx: &mut dyn Transaction,
        owner: &str,
        name: &str,
        asset: &NameOwnerPair,
        kind: AssetKind,
        user: &User,
    ) -> ServiceResult<()> {
        let mut state = self.write(tx).await;
        let idx = state.writable_collection(owner, name, Some(user))?;
        let record = &mut state.collections[idx];
        let before = record.assets.len();
        record.assets.retain(|a| {
            !(a.kind == kind && a.asset_owner.eq_ignore_ascii_case(&asset.owner) && a.asset_name == asset.name)
        });
        if record.assets.len() == before {
            return Err(ServiceError::not_found(format!(
                "{} [{}] is not in the collection",
                kind.label(),
                asset.name
            )));
        }
        record.collection.updated_at = now();
        Ok(())
    }

    async fn associated(
        &self,
        _tx: &mut dyn Transaction,
        page: &PaginationRequest,
        asset: &NameOwnerPair,
        kind: AssetKind,
        user: Option<&User>,
    ) -> ServiceResult<(Vec<Collection>, PaginationResult)> {
        let state = self.state.read().await;
        let found: Vec<Collection> = state
            .collections
            .iter()
            .filter(|r| {
                r.assets.iter().any(|a| {
                    a.kind == kind && a.asset_owner.eq_ignore_ascii_case(&asset.owner) && a.asset_name == asset.name
                })
            })
            .map(|r| &r.collection)
            .filter(|c| state.can_read_collection(c, user))
            .cloned()
            .collect();
        Ok(paginate(found, page))
    }

    async fn get_file(
        &self,
        _tx: &mut dyn Transaction,
        owner: &str,
        name: &str,
        path: &str,
        version: &str,
        user: Option<&User>,
    ) -> ServiceResult<(Vec<u8>, i64)> {
        let (location, current) = {
            let state = self.state.read().await;
            let idx = state.readable_collection(owner, name, user)?;
            let record = &state.collections[idx];
            (record.collection.location.clone(), record.version)
        };
        let version = match version {
            "" | "tip" => current,
            v => match v.parse::<i64>() {
                Ok(n) if n >= 1 && n <= current => n,
                _ => return Err(ServiceError::not_found(format!("Version [{}] not found", v))),
            },
        };
        let file = resolve_inside(&location, path)
            .ok_or_else(|| ServiceError::Invalid(format!("Invalid file path [{}]", path)))?;
        match tokio::fs::read(&file).await {
            Ok(bytes) => Ok((bytes, version)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ServiceError::not_found(format!("File [{}] not found", path)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn move_to(
        &self,
        tx: &mut dyn Transaction,
        owner: &str,
        name: &str,
        dest_owner: &str,
    ) -> ServiceResult<Collection> {
        self.sync_user(dest_owner).await?;
        let mut state = self.write(tx).await;
        let idx = state
            .collection_index(owner, name)
            .ok_or_else(|| ServiceError::not_found(format!("Collection [{}] not found", name)))?;
        let dest_owner = state
            .owner_name(dest_owner)
            .ok_or_else(|| ServiceError::not_found(format!("Owner [{}] not found", dest_owner)))?;
        if state.collection_index(&dest_owner, name).is_some() {
            return Err(ServiceError::AlreadyExists(format!(
                "Collection [{}] already exists for {}",
                name, dest_owner
            )));
        }
        let collection = &mut state.collections[idx].collection;
        collection.owner = dest_owner;
        collection.updated_at = now();
        Ok(collection.clone())
    }

    async fn remove_asset_from_all(
        &self,
        tx: &mut dyn Transaction,
        asset: &NameOwnerPair,
        kind: AssetKind,
    ) -> ServiceResult<()> {
        let mut state = self.write(tx).await;
        for record in state.collections.iter_mut() {
            record.assets.retain(|a| {
                !(a.kind == kind && a.asset_owner.eq_ignore_ascii_case(&asset.owner) && a.asset_name == asset.name)
            });
        }
        Ok(())
    }
}
