use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::database::{DatabaseError, Transaction};
use crate::middleware::binder::FormInput;
use crate::middleware::pagination::{PaginationRequest, PaginationResult};
use crate::middleware::validators::alphanum;
use crate::services::organizations::Organization;

/// A registered user, resolved per request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub name: Option<String>,
    pub email: Option<String>,
    /// Identity claim (`sub`) carried by bearer tokens
    #[serde(skip_serializing)]
    pub identity: String,
    pub is_admin: bool,
}

/// Personal access token record. The key itself is never stored, only its
/// SHA-256 hex digest.
#[derive(Debug, Clone, Serialize)]
pub struct AccessToken {
    #[serde(skip_serializing)]
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub user_id: Uuid,
    pub name: String,
    pub prefix: String,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub created: DateTime<Utc>,
    pub expires: Option<DateTime<Utc>>,
    pub revoked: bool,
}

impl AccessToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.map(|e| e <= now).unwrap_or(false)
    }
}

/// A freshly issued token. `key` (`<prefix>.<secret>`) is only ever shown here.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedAccessToken {
    pub name: String,
    pub prefix: String,
    pub key: String,
    pub created: DateTime<Utc>,
    pub expires: Option<DateTime<Utc>>,
}

/// User as returned to clients. `email`, `org_roles` and `id` are only
/// filled for the user themselves or a system admin.
#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub username: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub orgs: Vec<String>,
    #[serde(rename = "orgRoles", skip_serializing_if = "Option::is_none")]
    pub org_roles: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(rename = "sysAdmin")]
    pub sys_admin: bool,
}

impl UserResponse {
    /// `roles` maps organization name to the user's role in it
    pub fn new(user: &User, roles: BTreeMap<String, String>, requester: Option<&User>) -> Self {
        let same_user = requester.map(|r| r.id == user.id).unwrap_or(false);
        let private = same_user || requester.map(|r| r.is_admin).unwrap_or(false);
        Self {
            username: user.username.clone(),
            name: user.name.clone().unwrap_or_default(),
            email: user.email.clone().filter(|_| private),
            orgs: roles.keys().cloned().collect(),
            org_roles: private.then_some(roles),
            id: private.then_some(user.id),
            sys_admin: same_user && user.is_admin,
        }
    }
}

/// Either a user or an organization, addressed by owner name
#[derive(Debug, Clone, Serialize)]
pub struct OwnerProfile {
    #[serde(rename = "type")]
    pub owner_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserResponse>,
    #[serde(rename = "org", skip_serializing_if = "Option::is_none")]
    pub organization: Option<Organization>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateUser {
    #[validate(length(min = 3), custom(function = "alphanum"))]
    pub username: String,
    pub name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
}

impl FormInput for CreateUser {
    fn owner_names(&self) -> Vec<(&'static str, &str)> {
        vec![("username", self.username.as_str())]
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateUser {
    pub name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
}

impl UpdateUser {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none()
    }
}

impl FormInput for UpdateUser {}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateAccessToken {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
}

impl FormInput for CreateAccessToken {}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RevokeAccessToken {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 1))]
    pub prefix: String,
}

impl FormInput for RevokeAccessToken {}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn by_identity(&self, identity: &str) -> Result<Option<User>, DatabaseError>;

    async fn by_id(&self, id: Uuid) -> Result<Option<User>, DatabaseError>;

    async fn by_username(&self, username: &str) -> Result<Option<User>, DatabaseError>;

    /// Canonical spelling of a user or organization name
    async fn owner_by_name(
        &self,
        name: &str,
        include_deleted: bool,
    ) -> Result<Option<String>, DatabaseError>;

    async fn is_organization(&self, name: &str) -> Result<bool, DatabaseError>;

    async fn list_users(&self, page: &PaginationRequest) -> Result<(Vec<User>, PaginationResult), DatabaseError>;

    async fn insert_user(&self, tx: &mut dyn Transaction, user: &User) -> Result<(), DatabaseError>;

    /// Persist `name` and `email`
    async fn update_user(&self, tx: &mut dyn Transaction, user: &User) -> Result<(), DatabaseError>;

    /// Soft delete; the username stays taken
    async fn remove_user(&self, tx: &mut dyn Transaction, user: &User) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait AccessTokenStore: Send + Sync {
    async fn by_prefix(&self, prefix: &str) -> Result<Option<AccessToken>, DatabaseError>;

    async fn tokens_for(&self, tx: &mut dyn Transaction, user_id: Uuid) -> Result<Vec<AccessToken>, DatabaseError>;

    async fn insert_token(&self, tx: &mut dyn Transaction, token: &AccessToken) -> Result<(), DatabaseError>;

    /// Permanently delete the user's token matching `prefix` and `name`;
    /// `false` when there is none
    async fn delete_token(
        &self,
        tx: &mut dyn Transaction,
        user_id: Uuid,
        prefix: &str,
        name: &str,
    ) -> Result<bool, DatabaseError>;
}
