use async_trait::async_trait;

use super::ServiceResult;
use crate::types::Action;

/// Access-control collaborator. Subjects are owner names, resources are
/// opaque resource identifiers (asset uuids, owner names).
#[async_trait]
pub trait Permissions: Send + Sync {
    async fn is_authorized(&self, subject: &str, resource: &str, action: Action) -> ServiceResult<bool>;

    async fn is_system_admin(&self, username: &str) -> ServiceResult<bool>;

    async fn add_permission(&self, subject: &str, resource: &str, action: Action) -> ServiceResult<()>;

    async fn remove_permission(&self, subject: &str, resource: &str, action: Action) -> ServiceResult<()>;
}
