//! Collaborator ports.
//!
//! Handlers talk to the domain through these traits and never touch storage
//! directly. Every call receives the request's transaction so a collaborator
//! backed by a real database can enlist its writes in it.

pub mod assets;
pub mod categories;
pub mod collections;
pub mod competition;
pub mod licenses;
pub mod memory;
pub mod organizations;
pub mod permissions;
pub mod users;

use thiserror::Error;

use crate::database::DatabaseError;

pub use assets::AssetService;
pub use categories::CategoryService;
pub use collections::CollectionService;
pub use competition::CompetitionService;
pub use licenses::LicenseService;
pub use memory::MemoryBackend;
pub use organizations::OrganizationService;
pub use permissions::Permissions;
pub use users::{AccessTokenStore, UserStore};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    AlreadyExists(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    pub fn not_found(message: impl Into<String>) -> Self {
        ServiceError::NotFound(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ServiceError::Forbidden(message.into())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
