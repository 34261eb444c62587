use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    pub pagination: PaginationConfig,
    pub storage: StorageConfig,
    pub competition: CompetitionConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub max_request_size_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Base connection URL; `None` runs the in-memory backend
    pub url: Option<String>,
    pub name: String,
    pub max_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub jwt_secret: String,
    pub jwt_expiry_hours: u64,
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    pub default_per_page: u32,
    pub max_per_page: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Parent of the per-request staging directories
    pub staging_dir: PathBuf,
    /// Root of permanent resource storage (`<root>/<owner>/<kind>/<uuid>`)
    pub resource_root: PathBuf,
    /// Base URL zip archives and log files are downloaded from
    pub download_base_url: String,
    /// JSON array of reserved owner names
    pub owner_blacklist_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetitionConfig {
    pub default_competition: String,
    /// Name of the organization whose members administer competitions
    pub admin_organization: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Server overrides
        if let Ok(v) = env::var("SERVER_PORT") {
            self.server.port = v.parse().unwrap_or(self.server.port);
        }
        if let Ok(v) = env::var("SERVER_MAX_REQUEST_SIZE_BYTES") {
            self.server.max_request_size_bytes = v.parse().unwrap_or(self.server.max_request_size_bytes);
        }

        // Database overrides
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = Some(v).filter(|v| !v.is_empty());
        }
        if let Ok(v) = env::var("DATABASE_NAME") {
            self.database.name = v;
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }

        // Security overrides
        if let Ok(v) = env::var("SECURITY_JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("SECURITY_JWT_EXPIRY_HOURS") {
            self.security.jwt_expiry_hours = v.parse().unwrap_or(self.security.jwt_expiry_hours);
        }
        if let Ok(v) = env::var("SECURITY_ENABLE_CORS") {
            self.security.enable_cors = v.parse().unwrap_or(self.security.enable_cors);
        }
        if let Ok(v) = env::var("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }

        // Pagination overrides
        if let Ok(v) = env::var("PAGINATION_DEFAULT_PER_PAGE") {
            self.pagination.default_per_page = page_size("PAGINATION_DEFAULT_PER_PAGE", &v, self.pagination.default_per_page);
        }
        if let Ok(v) = env::var("PAGINATION_MAX_PER_PAGE") {
            self.pagination.max_per_page = page_size("PAGINATION_MAX_PER_PAGE", &v, self.pagination.max_per_page);
        }

        // Storage overrides
        if let Ok(v) = env::var("STORAGE_STAGING_DIR") {
            self.storage.staging_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("STORAGE_RESOURCE_ROOT") {
            self.storage.resource_root = PathBuf::from(v);
        }
        if let Ok(v) = env::var("STORAGE_DOWNLOAD_BASE_URL") {
            self.storage.download_base_url = v;
        }
        if let Ok(v) = env::var("STORAGE_OWNER_BLACKLIST") {
            self.storage.owner_blacklist_path = Some(PathBuf::from(v));
        }

        // Competition overrides
        if let Ok(v) = env::var("COMPETITION_DEFAULT") {
            self.competition.default_competition = v;
        }
        if let Ok(v) = env::var("COMPETITION_ADMIN_ORGANIZATION") {
            self.competition.admin_organization = v;
        }

        self
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            server: ServerConfig {
                port: 8000,
                max_request_size_bytes: 100 * 1024 * 1024, // 100MB
            },
            database: DatabaseConfig {
                url: None,
                name: "fuel".to_string(),
                max_connections: 10,
                connection_timeout: 30,
            },
            security: SecurityConfig {
                jwt_secret: "development-secret".to_string(),
                jwt_expiry_hours: 24 * 7, // 1 week
                enable_cors: true,
                cors_origins: vec!["http://localhost:3000".to_string()],
            },
            pagination: PaginationConfig {
                default_per_page: 20,
                max_per_page: 100,
            },
            storage: StorageConfig {
                staging_dir: env::temp_dir().join("fuel-staging"),
                resource_root: env::temp_dir().join("fuel-resources"),
                download_base_url: "http://localhost:8000/downloads".to_string(),
                owner_blacklist_path: None,
            },
            competition: CompetitionConfig {
                default_competition: "subt".to_string(),
                admin_organization: "subt".to_string(),
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            server: ServerConfig {
                port: 8000,
                max_request_size_bytes: 500 * 1024 * 1024, // 500MB
            },
            database: DatabaseConfig {
                url: None,
                name: "fuel_staging".to_string(),
                max_connections: 20,
                connection_timeout: 10,
            },
            security: SecurityConfig {
                jwt_secret: String::new(),
                jwt_expiry_hours: 24,
                enable_cors: true,
                cors_origins: vec!["https://staging.example.com".to_string()],
            },
            pagination: PaginationConfig {
                default_per_page: 20,
                max_per_page: 100,
            },
            storage: StorageConfig {
                staging_dir: PathBuf::from("/var/lib/fuel/staging"),
                resource_root: PathBuf::from("/var/lib/fuel/resources"),
                download_base_url: "https://staging.example.com/downloads".to_string(),
                owner_blacklist_path: None,
            },
            competition: CompetitionConfig {
                default_competition: "subt".to_string(),
                admin_organization: "subt".to_string(),
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            server: ServerConfig {
                port: 8000,
                max_request_size_bytes: 1024 * 1024 * 1024, // 1GB
            },
            database: DatabaseConfig {
                url: None,
                name: "fuel".to_string(),
                max_connections: 50,
                connection_timeout: 5,
            },
            security: SecurityConfig {
                jwt_secret: String::new(),
                jwt_expiry_hours: 4,
                enable_cors: true,
                cors_origins: vec!["https://app.example.com".to_string()],
            },
            pagination: PaginationConfig {
                default_per_page: 20,
                max_per_page: 100,
            },
            storage: StorageConfig {
                staging_dir: PathBuf::from("/var/lib/fuel/staging"),
                resource_root: PathBuf::from("/var/lib/fuel/resources"),
                download_base_url: "https://app.example.com/downloads".to_string(),
                owner_blacklist_path: None,
            },
            competition: CompetitionConfig {
                default_competition: "subt".to_string(),
                admin_organization: "subt".to_string(),
            },
        }
    }
}

/// A page size override; zero or unparseable values keep `current`
fn page_size(var: &str, value: &str, current: u32) -> u32 {
    match value.trim().parse::<u32>() {
        Ok(size) if size >= 1 => size,
        _ => {
            tracing::warn!("Ignoring {}={:?}: page sizes must be at least 1", var, value);
            current
        }
    }
}
