//! In-process implementations of every collaborator port.
//!
//! Used by the development server (no `DATABASE_URL`) and by the test suite.
//! State lives behind a single `tokio::sync::RwLock`; asset and log file
//! contents are written under the configured resource root.
//!
//! Writes are bound to the caller's transaction: the first write a
//! transaction makes snapshots the state into its journal and holds the
//! writer lock until the transaction ends, so a rollback or a failed commit
//! restores the snapshot.
//!
//! With a user directory attached, users come from the directory and are
//! mirrored into memory on lookup, so owner names and memberships resolve
//! against the same set of users the authenticator sees.

mod assets;
mod categories;
mod collections;
mod competition;
mod organizations;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, RwLockWriteGuard};
use uuid::Uuid;

use super::assets::Asset;
use super::categories::Category;
use super::collections::{Collection, CollectionAsset};
use super::competition::{LeaderboardEntry, LogFile, Participant, Registration};
use super::licenses::{default_licenses, License, LicenseService};
use super::organizations::{Organization, Team};
use super::users::{AccessToken, AccessTokenStore, User, UserStore};
use super::{Permissions, ServiceError, ServiceResult};
use crate::auth::new_access_token;
use crate::config::{CompetitionConfig, StorageConfig};
use crate::database::{DatabaseError, Transaction, Undo};
use crate::middleware::pagination::{paginate, PaginationRequest, PaginationResult};
use crate::types::Action;

const JOURNAL_KEY: &str = "memory";

#[derive(Clone)]
pub(super) struct AssetRecord {
    pub asset: Asset,
    pub liked_by: HashSet<String>,
    pub reports: Vec<String>,
}

#[derive(Clone)]
pub(super) struct CollectionRecord {
    pub collection: Collection,
    pub assets: Vec<CollectionAsset>,
    pub version: i64,
}

#[derive(Clone)]
pub(super) struct OrgRecord {
    pub org: Organization,
    pub creator: String,
    /// username -> role (`owner`, `admin`, `member`)
    pub members: BTreeMap<String, String>,
    pub teams: BTreeMap<String, Team>,
    pub deleted: bool,
}

#[derive(Clone)]
pub(super) struct LogRecord {
    pub log: LogFile,
    pub path: PathBuf,
}

#[derive(Clone, Default)]
pub(super) struct MemoryState {
    pub users: Vec<User>,
    /// Soft deleted users; their names stay taken
    pub removed_users: Vec<User>,
    pub tokens: HashMap<String, AccessToken>,
    pub organizations: Vec<OrgRecord>,
    pub permissions: HashSet<(String, String, Action)>,
    pub fail_permission_updates: bool,
    pub assets: Vec<AssetRecord>,
    pub collections: Vec<CollectionRecord>,
    pub categories: Vec<Category>,
    pub licenses: Vec<License>,
    pub registrations: Vec<Registration>,
    pub participants: Vec<Participant>,
    pub scores: Vec<LeaderboardEntry>,
    pub logs: Vec<LogRecord>,
    next_id: i64,
}

impl MemoryState {
    pub fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn user(&self, username: &str) -> Option<&User> {
        self.users.iter().find(|u| u.username.eq_ignore_ascii_case(username))
    }

    pub fn org(&self, name: &str) -> Option<&OrgRecord> {
        self.organizations
            .iter()
            .find(|o| !o.deleted && o.org.name.eq_ignore_ascii_case(name))
    }

    pub fn org_mut(&mut self, name: &str) -> Option<&mut OrgRecord> {
        self.organizations
            .iter_mut()
            .find(|o| !o.deleted && o.org.name.eq_ignore_ascii_case(name))
    }

    /// Canonical name of a user or (non-deleted) organization
    pub fn owner_name(&self, name: &str) -> Option<String> {
        self.user(name)
            .map(|u| u.username.clone())
            .or_else(|| self.org(name).map(|o| o.org.name.clone()))
    }

    pub fn role_in(&self, org: &str, username: &str) -> Option<&str> {
        self.org(org)?
            .members
            .iter()
            .find(|(member, _)| member.eq_ignore_ascii_case(username))
            .map(|(_, role)| role.as_str())
    }

    pub fn has_permission(&self, subject: &str, resource: &str, action: Action) -> bool {
        self.permissions
            .contains(&(subject.to_lowercase(), resource.to_lowercase(), action))
    }

    pub fn can_write_owner(&self, user: Option<&User>, owner: &str) -> bool {
        let Some(user) = user else {
            return false;
        };
        user.is_admin
            || user.username.eq_ignore_ascii_case(owner)
            || matches!(self.role_in(owner, &user.username), Some("owner") | Some("admin"))
            || self.has_permission(&user.username, owner, Action::Write)
    }

    pub fn can_read_owner(&self, user: Option<&User>, owner: &str) -> bool {
        let Some(u) = user else {
            return false;
        };
        self.can_write_owner(user, owner)
            || self.role_in(owner, &u.username).is_some()
            || self.has_permission(&u.username, owner, Action::Read)
    }

    /// Whether `username` administers `org` (role owner or admin)
    pub fn is_org_admin(&self, org: &str, user: &User) -> bool {
        user.is_admin || matches!(self.role_in(org, &user.username), Some("owner") | Some("admin"))
    }

    /// Insert or refresh a user by id
    fn mirror(&mut self, user: &User) {
        match self.users.iter_mut().find(|u| u.id == user.id) {
            Some(existing) => *existing = user.clone(),
            None => self.users.push(user.clone()),
        }
    }
}

/// State as it was before a transaction's first write. Holds the writer lock
/// until the transaction ends.
struct Snapshot {
    state: Arc<RwLock<MemoryState>>,
    saved: MemoryState,
    _writer: OwnedMutexGuard<()>,
}

#[async_trait]
impl Undo for Snapshot {
    async fn undo(self: Box<Self>) {
        let Snapshot { state, saved, _writer } = *self;
        *state.write().await = saved;
    }

    fn undo_detached(self: Box<Self>) {
        let Snapshot { state, saved, _writer } = *self;
        if let Ok(mut guard) = state.try_write() {
            *guard = saved;
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    *state.write().await = saved;
                    drop(_writer);
                });
            }
            Err(_) => tracing::error!("Dropped transaction could not restore in-memory state"),
        }
    }
}

/// Every collaborator port, backed by process memory and the local filesystem.
#[derive(Clone)]
pub struct MemoryBackend {
    pub(super) state: Arc<RwLock<MemoryState>>,
    writer: Arc<Mutex<()>>,
    directory: Option<Arc<dyn UserStore>>,
    pub(super) resource_root: PathBuf,
    pub(super) download_base_url: String,
    pub(super) competition_admins: String,
}

impl MemoryBackend {
    pub fn new(storage: &StorageConfig, competition: &CompetitionConfig) -> Self {
        let state = MemoryState {
            licenses: default_licenses(),
            ..MemoryState::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
            writer: Arc::new(Mutex::new(())),
            directory: None,
            resource_root: storage.resource_root.clone(),
            download_base_url: storage.download_base_url.trim_end_matches('/').to_string(),
            competition_admins: competition.admin_organization.clone(),
        }
    }

    /// Users live in `directory`; everything else stays in memory
    pub fn with_directory(
        storage: &StorageConfig,
        competition: &CompetitionConfig,
        directory: Arc<dyn UserStore>,
    ) -> Self {
        Self {
            directory: Some(directory),
            ..Self::new(storage, competition)
        }
    }

    /// Write access to the state on behalf of `tx`. The first call per
    /// transaction waits for the writer lock and journals a snapshot.
    pub(super) async fn write(&self, tx: &mut dyn Transaction) -> RwLockWriteGuard<'_, MemoryState> {
        if tx.journal().contains(JOURNAL_KEY) {
            return self.state.write().await;
        }
        let writer = self.writer.clone().lock_owned().await;
        let guard = self.state.write().await;
        tx.journal().record(
            JOURNAL_KEY,
            Box::new(Snapshot {
                state: self.state.clone(),
                saved: guard.clone(),
                _writer: writer,
            }),
        );
        guard
    }

    /// Mirror `username` from the user directory, if there is one
    pub(super) async fn sync_user(&self, username: &str) -> ServiceResult<()> {
        if self.directory.is_some() {
            self.by_username(username).await?;
        }
        Ok(())
    }

    async fn mirrored(&self, user: Option<User>) -> Option<User> {
        if let Some(user) = &user {
            self.state.write().await.mirror(user);
        }
        user
    }

    pub async fn add_user(&self, username: &str, identity: &str) -> User {
        self.seed_user(username, identity, false).await
    }

    pub async fn add_admin(&self, username: &str, identity: &str) -> User {
        self.seed_user(username, identity, true).await
    }

    async fn seed_user(&self, username: &str, identity: &str, is_admin: bool) -> User {
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            name: None,
            email: None,
            identity: identity.to_string(),
            is_admin,
        };
        self.state.write().await.users.push(user.clone());
        user
    }

    /// Issue a personal access token outside any request; the returned
    /// `<prefix>.<key>` string is the only place the key appears
    pub async fn issue_access_token(&self, user: &User, name: &str) -> String {
        let (token, issued) = new_access_token(user.id, name, None);
        self.state.write().await.tokens.insert(token.prefix.clone(), token);
        issued
    }

    pub async fn revoke_access_token(&self, token: &str) {
        let prefix = token.split('.').next().unwrap_or_default();
        if let Some(t) = self.state.write().await.tokens.get_mut(prefix) {
            t.revoked = true;
        }
    }

    /// Make permission grants and revocations fail (exercises transfer rollback)
    pub async fn fail_permission_updates(&self, fail: bool) {
        self.state.write().await.fail_permission_updates = fail;
    }

    pub async fn record_score(&self, competition: &str, circuit: Option<&str>, owner: &str, score: f32) {
        self.state.write().await.scores.push(LeaderboardEntry {
            owner: owner.to_string(),
            competition: competition.to_string(),
            circuit: circuit.map(str::to_string),
            score: Some(score),
        });
    }

    pub(super) fn asset_location(&self, owner: &str, segment: &str, uuid: &str) -> PathBuf {
        self.resource_root.join(owner).join(segment).join(uuid)
    }
}

#[async_trait]
impl UserStore for MemoryBackend {
    async fn by_identity(&self, identity: &str) -> Result<Option<User>, DatabaseError> {
        if let Some(directory) = &self.directory {
            let user = directory.by_identity(identity).await?;
            return Ok(self.mirrored(user).await);
        }
        let state = self.state.read().await;
        Ok(state.users.iter().find(|u| u.identity == identity).cloned())
    }

    async fn by_id(&self, id: Uuid) -> Result<Option<User>, DatabaseError> {
        if let Some(directory) = &self.directory {
            let user = directory.by_id(id).await?;
            return Ok(self.mirrored(user).await);
        }
        let state = self.state.read().await;
        Ok(state.users.iter().find(|u| u.id == id).cloned())
    }

    async fn by_username(&self, username: &str) -> Result<Option<User>, DatabaseError> {
        if let Some(directory) = &self.directory {
            let user = directory.by_username(username).await?;
            return Ok(self.mirrored(user).await);
        }
        Ok(self.state.read().await.user(username).cloned())
    }

    async fn owner_by_name(&self, name: &str, include_deleted: bool) -> Result<Option<String>, DatabaseError> {
        if let Some(directory) = &self.directory {
            if let Some(user) = directory.owner_by_name(name, include_deleted).await? {
                return Ok(Some(user));
            }
        }
        let state = self.state.read().await;
        if let Some(owner) = state.owner_name(name) {
            return Ok(Some(owner));
        }
        if include_deleted {
            let removed = state
                .removed_users
                .iter()
                .find(|u| u.username.eq_ignore_ascii_case(name))
                .map(|u| u.username.clone());
            return Ok(removed.or_else(|| {
                state
                    .organizations
                    .iter()
                    .find(|o| o.org.name.eq_ignore_ascii_case(name))
                    .map(|o| o.org.name.clone())
            }));
        }
        Ok(None)
    }

    async fn is_organization(&self, name: &str) -> Result<bool, DatabaseError> {
        Ok(self.state.read().await.org(name).is_some())
    }

    async fn list_users(&self, page: &PaginationRequest) -> Result<(Vec<User>, PaginationResult), DatabaseError> {
        if let Some(directory) = &self.directory {
            return directory.list_users(page).await;
        }
        let mut users = self.state.read().await.users.clone();
        users.sort_by_key(|u| u.username.to_lowercase());
        Ok(paginate(users, page))
    }

    async fn insert_user(&self, tx: &mut dyn Transaction, user: &User) -> Result<(), DatabaseError> {
        if let Some(directory) = &self.directory {
            directory.insert_user(tx, user).await?;
        }
        self.write(tx).await.mirror(user);
        Ok(())
    }

    async fn update_user(&self, tx: &mut dyn Transaction, user: &User) -> Result<(), DatabaseError> {
        if let Some(directory) = &self.directory {
            directory.update_user(tx, user).await?;
        }
        self.write(tx).await.mirror(user);
        Ok(())
    }

    async fn remove_user(&self, tx: &mut dyn Transaction, user: &User) -> Result<(), DatabaseError> {
        if let Some(directory) = &self.directory {
            directory.remove_user(tx, user).await?;
        }
        let mut state = self.write(tx).await;
        state.users.retain(|u| u.id != user.id);
        state.tokens.retain(|_, t| t.user_id != user.id);
        state.removed_users.push(user.clone());
        Ok(())
    }
}

#[async_trait]
impl AccessTokenStore for MemoryBackend {
    async fn by_prefix(&self, prefix: &str) -> Result<Option<AccessToken>, DatabaseError> {
        Ok(self.state.read().await.tokens.get(prefix).cloned())
    }

    async fn tokens_for(&self, _tx: &mut dyn Transaction, user_id: Uuid) -> Result<Vec<AccessToken>, DatabaseError> {
        let state = self.state.read().await;
        let mut tokens: Vec<AccessToken> = state
            .tokens
            .values()
            .filter(|t| t.user_id == user_id && !t.revoked)
            .cloned()
            .collect();
        tokens.sort_by_key(|t| t.created);
        Ok(tokens)
    }

    async fn insert_token(&self, tx: &mut dyn Transaction, token: &AccessToken) -> Result<(), DatabaseError> {
        self.write(tx).await.tokens.insert(token.prefix.clone(), token.clone());
        Ok(())
    }

    async fn delete_token(
        &self,
        tx: &mut dyn Transaction,
        user_id: Uuid,
        prefix: &str,
        name: &str,
    ) -> Result<bool, DatabaseError> {
        let mut state = self.write(tx).await;
        let matches = state
            .tokens
            .get(prefix)
            .map(|t| t.user_id == user_id && t.name == name)
            .unwrap_or(false);
        if matches {
            state.tokens.remove(prefix);
        }
        Ok(matches)
    }
}

#[async_trait]
impl LicenseService for MemoryBackend {
    async fn list(
        &self,
        _tx: &mut dyn Transaction,
        page: &PaginationRequest,
    ) -> ServiceResult<(Vec<License>, PaginationResult)> {
        Ok(paginate(self.state.read().await.licenses.clone(), page))
    }

    async fn get(&self, _tx: &mut dyn Transaction, id: i64) -> ServiceResult<Option<License>> {
        Ok(self.state.read().await.licenses.iter().find(|l| l.id == id).cloned())
    }
}

#[async_trait]
impl Permissions for MemoryBackend {
    async fn is_authorized(&self, subject: &str, resource: &str, action: Action) -> ServiceResult<bool> {
        let state = self.state.read().await;
        if subject.eq_ignore_ascii_case(resource) || state.has_permission(subject, resource, action) {
            return Ok(true);
        }
        let allowed = match (state.role_in(resource, subject), action) {
            (Some("owner") | Some("admin"), _) => true,
            (Some(_), Action::Read) => true,
            _ => false,
        };
        Ok(allowed)
    }

    async fn is_system_admin(&self, username: &str) -> ServiceResult<bool> {
        Ok(self.state.read().await.user(username).map(|u| u.is_admin).unwrap_or(false))
    }

    async fn add_permission(&self, subject: &str, resource: &str, action: Action) -> ServiceResult<()> {
        let mut state = self.state.write().await;
        if state.fail_permission_updates {
            return Err(ServiceError::Invalid("permission store rejected the update".to_string()));
        }
        state
            .permissions
            .insert((subject.to_lowercase(), resource.to_lowercase(), action));
        Ok(())
    }

    async fn remove_permission(&self, subject: &str, resource: &str, action: Action) -> ServiceResult<()> {
        let mut state = self.state.write().await;
        if state.fail_permission_updates {
            return Err(ServiceError::Invalid("permission store rejected the update".to_string()));
        }
        state
            .permissions
            .remove(&(subject.to_lowercase(), resource.to_lowercase(), action));
        Ok(())
    }
}

/// Run blocking filesystem work off the async workers
pub(super) async fn blocking<T, F>(f: F) -> ServiceResult<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let result = tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    Ok(result?)
}

/// Recursively copy `src` into `dst`, returning the number of bytes copied
pub(super) fn copy_tree(src: &Path, dst: &Path) -> io::Result<u64> {
    std::fs::create_dir_all(dst)?;
    let mut total = 0;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            total += copy_tree(&entry.path(), &target)?;
        } else {
            total += std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(total)
}

/// Resolve a client supplied relative path inside `root`
pub(super) fn resolve_inside(root: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative.trim_start_matches('/'));
    let mut resolved = root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (resolved != root).then_some(resolved)
}

pub(super) fn now() -> chrono::DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::database::{Database, MemoryDatabase};
    use crate::services::categories::{CategoryService, CreateCategory};
    use crate::services::organizations::{CreateOrganization, OrganizationService};

    pub(crate) fn backend(root: &Path) -> MemoryBackend {
        let mut config = AppConfig::development();
        config.storage.resource_root = root.to_path_buf();
        MemoryBackend::new(&config.storage, &config.competition)
    }

    fn category(name: &str) -> CreateCategory {
        CreateCategory {
            name: name.to_string(),
            slug: None,
            parent_id: None,
        }
    }

    #[tokio::test]
    async fn access_token_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let user = backend.add_user("alice", "auth0|alice").await;
        let token = backend.issue_access_token(&user, "ci").await;

        let (prefix, key) = token.split_once('.').unwrap();
        let stored = backend.by_prefix(prefix).await.unwrap().unwrap();
        assert_eq!(stored.user_id, user.id);
        assert_eq!(stored.key_hash, crate::auth::hash_token_key(key));
        assert!(!stored.revoked);

        backend.revoke_access_token(&token).await;
        assert!(backend.by_prefix(prefix).await.unwrap().unwrap().revoked);
    }

    #[tokio::test]
    async fn tokens_are_deleted_by_owner_prefix_and_name() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let db = MemoryDatabase::new();
        let alice = backend.add_user("alice", "auth0|alice").await;
        let bob = backend.add_user("bob", "auth0|bob").await;
        let (token, _) = new_access_token(alice.id, "ci", None);

        let mut tx = db.begin().await.unwrap();
        backend.insert_token(tx.as_mut(), &token).await.unwrap();
        assert_eq!(backend.tokens_for(tx.as_mut(), alice.id).await.unwrap().len(), 1);
        assert!(!backend.delete_token(tx.as_mut(), bob.id, &token.prefix, "ci").await.unwrap());
        assert!(!backend.delete_token(tx.as_mut(), alice.id, &token.prefix, "other").await.unwrap());
        assert!(backend.delete_token(tx.as_mut(), alice.id, &token.prefix, "ci").await.unwrap());
        assert!(backend.tokens_for(tx.as_mut(), alice.id).await.unwrap().is_empty());
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn owner_lookup_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        backend.add_user("Alice", "auth0|alice").await;
        assert_eq!(backend.owner_by_name("alice", false).await.unwrap().as_deref(), Some("Alice"));
        assert!(backend.owner_by_name("bob", true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn removed_user_name_stays_taken() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let db = MemoryDatabase::new();
        let alice = backend.add_user("alice", "auth0|alice").await;

        let mut tx = db.begin().await.unwrap();
        backend.remove_user(tx.as_mut(), &alice).await.unwrap();
        tx.commit().await.unwrap();

        assert!(backend.by_identity("auth0|alice").await.unwrap().is_none());
        assert!(backend.owner_by_name("alice", false).await.unwrap().is_none());
        assert_eq!(backend.owner_by_name("alice", true).await.unwrap().as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn failed_commit_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let db = MemoryDatabase::new();

        db.fail_commits(true);
        let mut tx = db.begin().await.unwrap();
        CategoryService::create(&backend, tx.as_mut(), &category("Rovers")).await.unwrap();
        assert!(tx.commit().await.is_err());

        let mut tx = db.begin().await.unwrap();
        assert!(CategoryService::list(&backend, tx.as_mut()).await.unwrap().is_empty());
        drop(tx);

        db.fail_commits(false);
        let mut tx = db.begin().await.unwrap();
        CategoryService::create(&backend, tx.as_mut(), &category("Rovers")).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = db.begin().await.unwrap();
        assert_eq!(CategoryService::list(&backend, tx.as_mut()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dropped_transaction_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let db = MemoryDatabase::new();

        let mut tx = db.begin().await.unwrap();
        CategoryService::create(&backend, tx.as_mut(), &category("Rovers")).await.unwrap();
        CategoryService::create(&backend, tx.as_mut(), &category("Drones")).await.unwrap();
        drop(tx);

        let mut tx = db.begin().await.unwrap();
        assert!(CategoryService::list(&backend, tx.as_mut()).await.unwrap().is_empty());
        CategoryService::create(&backend, tx.as_mut(), &category("Rovers")).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn directory_users_resolve_as_owners() {
        let dir = tempfile::tempdir().unwrap();
        let directory = backend(dir.path());
        directory.add_user("alice", "auth0|alice").await;
        directory.add_user("carol", "auth0|carol").await;

        let config = AppConfig::development();
        let backend = MemoryBackend::with_directory(&config.storage, &config.competition, Arc::new(directory.clone()));
        let db = MemoryDatabase::new();

        let alice = backend.by_identity("auth0|alice").await.unwrap().unwrap();
        let input = CreateOrganization {
            name: "Robotics".to_string(),
            email: None,
            description: None,
        };
        let mut tx = db.begin().await.unwrap();
        OrganizationService::create(&backend, tx.as_mut(), &input, &alice).await.unwrap();
        backend
            .add_member(tx.as_mut(), "Robotics", "carol", "member", &alice)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(backend.owner_by_name("robotics", false).await.unwrap().as_deref(), Some("Robotics"));
        assert_eq!(backend.owner_by_name("CAROL", false).await.unwrap().as_deref(), Some("carol"));
        assert!(backend.is_organization("Robotics").await.unwrap());

        let mut tx = db.begin().await.unwrap();
        let roles = backend.memberships(tx.as_mut(), "carol").await.unwrap();
        assert_eq!(roles.get("Robotics").map(String::as_str), Some("member"));
    }

    #[test]
    fn resolve_inside_rejects_escapes() {
        let root = Path::new("/srv/model");
        assert_eq!(resolve_inside(root, "/meshes/a.dae").unwrap(), root.join("meshes/a.dae"));
        assert!(resolve_inside(root, "../secret").is_none());
        assert!(resolve_inside(root, "").is_none());
    }

    #[tokio::test]
    async fn failing_permission_updates() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        backend.add_permission("alice", "uuid-1", Action::Read).await.unwrap();
        assert!(backend.is_authorized("alice", "uuid-1", Action::Read).await.unwrap());
        assert!(!backend.is_authorized("alice", "uuid-1", Action::Write).await.unwrap());

        backend.fail_permission_updates(true).await;
        assert!(backend.remove_permission("alice", "uuid-1", Action::Read).await.is_err());
    }
}
