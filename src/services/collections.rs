use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::users::User;
use super::ServiceResult;
use crate::database::Transaction;
use crate::middleware::binder::FormInput;
use crate::middleware::pagination::{PaginationRequest, PaginationResult};
use crate::middleware::validators::{no_forward_slash, no_percent};
use crate::types::{AssetKind, SortOrder};

#[derive(Debug, Clone, Serialize)]
pub struct Collection {
    #[serde(skip)]
    pub id: i64,
    #[serde(skip)]
    pub uuid: String,
    pub name: String,
    pub owner: String,
    #[serde(skip)]
    pub creator: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub private: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub thumbnails: Vec<String>,
    #[serde(skip)]
    pub location: PathBuf,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Asset membership entry of a collection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionAsset {
    pub asset_name: String,
    pub asset_owner: String,
    #[serde(rename = "type")]
    pub kind: AssetKind,
}

#[derive(Debug, Clone)]
pub struct CollectionListQuery {
    pub pagination: PaginationRequest,
    pub owner: Option<String>,
    pub order: Option<SortOrder>,
    pub search: String,
    /// Only collections the requesting user can add assets to
    pub extend: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateCollection {
    #[validate(
        length(min = 3),
        custom(function = "no_forward_slash"),
        custom(function = "no_percent")
    )]
    pub name: String,
    pub owner: Option<String>,
    pub description: Option<String>,
    pub private: Option<bool>,
}

impl FormInput for CreateCollection {}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CloneCollection {
    #[validate(
        length(min = 3),
        custom(function = "no_forward_slash"),
        custom(function = "no_percent")
    )]
    pub name: Option<String>,
    pub owner: Option<String>,
    pub private: Option<bool>,
}

impl FormInput for CloneCollection {}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateCollection {
    pub description: Option<String>,
    pub private: Option<bool>,
}

impl UpdateCollection {
    pub fn is_empty(&self) -> bool {
        self.description.is_none() && self.private.is_none()
    }
}

impl FormInput for UpdateCollection {}

/// Identifies an asset by name and owner
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Validate)]
pub struct NameOwnerPair {
    #[validate(
        length(min = 1),
        custom(function = "no_forward_slash"),
        custom(function = "no_percent")
    )]
    pub name: String,
    #[validate(length(min = 1))]
    pub owner: String,
}

impl FormInput for NameOwnerPair {}

#[async_trait]
pub trait CollectionService: Send + Sync {
    async fn list(
        &self,
        tx: &mut dyn Transaction,
        query: &CollectionListQuery,
        user: Option<&User>,
    ) -> ServiceResult<(Vec<Collection>, PaginationResult)>;

    async fn get(
        &self,
        tx: &mut dyn Transaction,
        owner: &str,
        name: &str,
        user: Option<&User>,
    ) -> ServiceResult<Collection>;

    async fn create(
        &self,
        tx: &mut dyn Transaction,
        input: &CreateCollection,
        user: &User,
    ) -> ServiceResult<Collection>;

    async fn clone_collection(
        &self,
        tx: &mut dyn Transaction,
        owner: &str,
        name: &str,
        input: &CloneCollection,
        user: &User,
    ) -> ServiceResult<Collection>;

    async fn update(
        &self,
        tx: &mut dyn Transaction,
        owner: &str,
        name: &str,
        input: &UpdateCollection,
        new_files: Option<&Path>,
        user: Option<&User>,
    ) -> ServiceResult<Collection>;

    async fn remove(
        &self,
        tx: &mut dyn Transaction,
        owner: &str,
        name: &str,
        user: &User,
    ) -> ServiceResult<()>;

    async fn assets(
        &self,
        tx: &mut dyn Transaction,
        page: &PaginationRequest,
        owner: &str,
        name: &str,
        kind: AssetKind,
        user: Option<&User>,
    ) -> ServiceResult<(Vec<CollectionAsset>, PaginationResult)>;

    async fn add_asset(
        &self,
        tx: &mut dyn Transaction,
        owner: &str,
        name: &str,
        asset: &NameOwnerPair,
        kind: AssetKind,
        user: &User,
    ) -> ServiceResult<CollectionAsset>;

    async fn remove_asset(
        &self,
        tx: &mut dyn Transaction,
        owner: &str,
        name: &str,
        asset: &NameOwnerPair,
        kind: AssetKind,
        user: &User,
    ) -> ServiceResult<()>;

    /// Collections an asset belongs to
    async fn associated(
        &self,
        tx: &mut dyn Transaction,
        page: &PaginationRequest,
        asset: &NameOwnerPair,
        kind: AssetKind,
        user: Option<&User>,
    ) -> ServiceResult<(Vec<Collection>, PaginationResult)>;

    async fn get_file(
        &self,
        tx: &mut dyn Transaction,
        owner: &str,
        name: &str,
        path: &str,
        version: &str,
        user: Option<&User>,
    ) -> ServiceResult<(Vec<u8>, i64)>;

    async fn move_to(
        &self,
        tx: &mut dyn Transaction,
        owner: &str,
        name: &str,
        dest_owner: &str,
    ) -> ServiceResult<Collection>;

    /// Drop a removed asset from every collection
    async fn remove_asset_from_all(
        &self,
        tx: &mut dyn Transaction,
        asset: &NameOwnerPair,
        kind: AssetKind,
    ) -> ServiceResult<()>;
}
