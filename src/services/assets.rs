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
use crate::middleware::validators::{no_forward_slash, no_percent, split_list};
use crate::types::{AssetKind, SortOrder};

/// A model or world as returned to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    #[serde(skip)]
    pub id: i64,
    #[serde(skip)]
    pub uuid: String,
    pub kind: AssetKind,
    pub name: String,
    pub owner: String,
    pub creator: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    pub license_id: i64,
    pub permission: i32,
    pub private: bool,
    pub version: i64,
    pub likes: i64,
    pub downloads: i64,
    pub filesize: u64,
    pub metadata: Vec<AssetMetadatum>,
    /// Permanent storage directory
    #[serde(skip)]
    pub location: PathBuf,
    pub upload_date: DateTime<Utc>,
    pub modify_date: DateTime<Utc>,
}

/// Free-form key/value pair attached to an asset, submitted as one JSON
/// object per `metadata` form field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetMetadatum {
    pub key: String,
    pub value: String,
}

impl AssetMetadatum {
    /// Parse `metadata` form lines, skipping those that are not valid JSON
    pub fn parse_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Vec<AssetMetadatum> {
        lines
            .into_iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileNode {
    pub name: String,
    pub path: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FileNode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileTree {
    pub name: String,
    pub owner: String,
    pub version: i64,
    pub file_tree: Vec<FileNode>,
}

/// Where a zip archive can be fetched from
#[derive(Debug, Clone)]
pub enum ZipLocation {
    Remote(String),
    Local(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ZipDownload {
    pub location: ZipLocation,
    pub version: i64,
    pub uuid: String,
}

/// Model included by a world (`<include>` references)
#[derive(Debug, Clone, Serialize)]
pub struct ModelReference {
    pub owner: String,
    pub name: String,
    pub version: i64,
}

#[derive(Debug, Clone)]
pub struct AssetListQuery {
    pub pagination: PaginationRequest,
    pub owner: Option<String>,
    pub order: Option<SortOrder>,
    pub search: String,
    /// Only assets liked by this user
    pub liked_by: Option<String>,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateAsset {
    #[validate(
        length(min = 3),
        custom(function = "no_forward_slash"),
        custom(function = "no_percent")
    )]
    pub name: String,
    /// Defaults to the requesting user
    pub owner: Option<String>,
    #[serde(rename = "urlName")]
    pub url_name: Option<String>,
    #[validate(range(min = 1))]
    pub license: i64,
    #[serde(default)]
    #[validate(range(min = 0, max = 1))]
    pub permission: i32,
    pub description: Option<String>,
    pub tags: Option<String>,
    pub private: Option<bool>,
    pub categories: Option<String>,
}

impl CreateAsset {
    pub fn tag_list(&self) -> Vec<String> {
        self.tags.as_deref().map(split_list).unwrap_or_default()
    }

    pub fn category_list(&self) -> Vec<String> {
        self.categories.as_deref().map(split_list).unwrap_or_default()
    }
}

impl FormInput for CreateAsset {}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CloneAsset {
    #[validate(
        length(min = 3),
        custom(function = "no_forward_slash"),
        custom(function = "no_percent")
    )]
    pub name: Option<String>,
    pub owner: Option<String>,
    pub private: Option<bool>,
}

impl FormInput for CloneAsset {}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateAsset {
    pub description: Option<String>,
    pub tags: Option<String>,
    pub private: Option<bool>,
    pub categories: Option<String>,
}

impl UpdateAsset {
    pub fn is_empty(&self) -> bool {
        self.description.is_none() && self.tags.is_none() && self.private.is_none() && self.categories.is_none()
    }
}

impl FormInput for UpdateAsset {}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateReport {
    #[validate(length(max = 1000))]
    #[serde(default)]
    pub reason: String,
}

impl FormInput for CreateReport {}

/// Changes applied by [`AssetService::update`]
#[derive(Debug, Default)]
pub struct AssetChanges<'a> {
    pub fields: UpdateAsset,
    pub metadata: Option<Vec<AssetMetadatum>>,
    /// Staged directory whose contents become the next version
    pub new_files: Option<&'a Path>,
}

/// Storage and metadata of models and worlds.
#[async_trait]
pub trait AssetService: Send + Sync {
    async fn list(
        &self,
        tx: &mut dyn Transaction,
        kind: AssetKind,
        query: &AssetListQuery,
        user: Option<&User>,
    ) -> ServiceResult<(Vec<Asset>, PaginationResult)>;

    async fn get(
        &self,
        tx: &mut dyn Transaction,
        kind: AssetKind,
        owner: &str,
        name: &str,
        user: Option<&User>,
    ) -> ServiceResult<Asset>;

    async fn file_tree(
        &self,
        tx: &mut dyn Transaction,
        kind: AssetKind,
        owner: &str,
        name: &str,
        version: &str,
        user: Option<&User>,
    ) -> ServiceResult<FileTree>;

    /// File contents and the resolved version
    async fn get_file(
        &self,
        tx: &mut dyn Transaction,
        kind: AssetKind,
        owner: &str,
        name: &str,
        path: &str,
        version: &str,
        user: Option<&User>,
    ) -> ServiceResult<(Vec<u8>, i64)>;

    async fn download_zip(
        &self,
        tx: &mut dyn Transaction,
        kind: AssetKind,
        owner: &str,
        name: &str,
        version: &str,
        user: Option<&User>,
        user_agent: Option<&str>,
    ) -> ServiceResult<ZipDownload>;

    /// Moves the staged files into permanent storage and records the asset
    async fn create(
        &self,
        tx: &mut dyn Transaction,
        kind: AssetKind,
        owner: &str,
        input: &CreateAsset,
        metadata: Vec<AssetMetadatum>,
        staged: &Path,
        creator: &User,
    ) -> ServiceResult<Asset>;

    async fn clone_asset(
        &self,
        tx: &mut dyn Transaction,
        kind: AssetKind,
        owner: &str,
        name: &str,
        input: &CloneAsset,
        user: &User,
    ) -> ServiceResult<Asset>;

    async fn update(
        &self,
        tx: &mut dyn Transaction,
        kind: AssetKind,
        owner: &str,
        name: &str,
        changes: AssetChanges<'_>,
        user: Option<&User>,
    ) -> ServiceResult<Asset>;

    async fn remove(
        &self,
        tx: &mut dyn Transaction,
        kind: AssetKind,
        owner: &str,
        name: &str,
        user: &User,
    ) -> ServiceResult<Asset>;

    /// Returns the new like count
    async fn like(
        &self,
        tx: &mut dyn Transaction,
        kind: AssetKind,
        owner: &str,
        name: &str,
        user: &User,
    ) -> ServiceResult<i64>;

    async fn unlike(
        &self,
        tx: &mut dyn Transaction,
        kind: AssetKind,
        owner: &str,
        name: &str,
        user: &User,
    ) -> ServiceResult<i64>;

    async fn report(
        &self,
        tx: &mut dyn Transaction,
        kind: AssetKind,
        owner: &str,
        name: &str,
        reason: &str,
    ) -> ServiceResult<()>;

    /// Re-own an asset. Permissions are handled by the caller.
    async fn move_to(
        &self,
        tx: &mut dyn Transaction,
        kind: AssetKind,
        owner: &str,
        name: &str,
        dest_owner: &str,
    ) -> ServiceResult<Asset>;

    async fn model_references(
        &self,
        tx: &mut dyn Transaction,
        owner: &str,
        world: &str,
        version: &str,
        user: Option<&User>,
    ) -> ServiceResult<Vec<ModelReference>>;
}
