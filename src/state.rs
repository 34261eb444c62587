use std::sync::Arc;

use crate::auth::AuthResolver;
use crate::config::AppConfig;
use crate::database::{Database, MemoryDatabase};
use crate::middleware::binder::Binder;
use crate::middleware::multipart::Stager;
use crate::services::{
    AccessTokenStore, AssetService, CategoryService, CollectionService, CompetitionService, LicenseService,
    MemoryBackend, OrganizationService, Permissions, UserStore,
};

/// Everything a handler needs, shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<dyn Database>,
    pub auth: AuthResolver,
    pub users: Arc<dyn UserStore>,
    pub tokens: Arc<dyn AccessTokenStore>,
    pub permissions: Arc<dyn Permissions>,
    pub assets: Arc<dyn AssetService>,
    pub collections: Arc<dyn CollectionService>,
    pub organizations: Arc<dyn OrganizationService>,
    pub categories: Arc<dyn CategoryService>,
    pub competition: Arc<dyn CompetitionService>,
    pub licenses: Arc<dyn LicenseService>,
    pub binder: Binder,
    pub stager: Stager,
}

impl AppState {
    /// Every collaborator served by one [`MemoryBackend`]
    pub fn in_memory(config: AppConfig, db: MemoryDatabase, backend: MemoryBackend) -> anyhow::Result<Self> {
        let backend = Arc::new(backend);
        Self::new(config, Arc::new(db), backend.clone(), backend)
    }

    /// Access tokens from `tokens`; users (through the backend's user
    /// directory, if any) and domain collaborators from `backend`
    pub fn new(
        config: AppConfig,
        db: Arc<dyn Database>,
        tokens: Arc<dyn AccessTokenStore>,
        backend: Arc<MemoryBackend>,
    ) -> anyhow::Result<Self> {
        let binder = Binder::from_config(&config.storage)?;
        let stager = Stager::from_config(&config.storage);
        let users: Arc<dyn UserStore> = backend.clone();
        let auth = AuthResolver::new(users.clone(), tokens.clone(), config.security.jwt_secret.clone());

        Ok(Self {
            config: Arc::new(config),
            db,
            auth,
            users,
            tokens,
            permissions: backend.clone(),
            assets: backend.clone(),
            collections: backend.clone(),
            organizations: backend.clone(),
            categories: backend.clone(),
            competition: backend.clone(),
            licenses: backend,
            binder,
            stager,
        })
    }
}
