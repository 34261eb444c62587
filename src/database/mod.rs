//! Transaction boundary shared by handlers and collaborator services.
//!
//! Handlers receive one [`Transaction`] per request. Mutating handlers commit
//! it explicitly before writing a response body; a transaction that is dropped
//! without commit is rolled back.
//!
//! Collaborators whose writes do not go through the database connection
//! record an [`Undo`] step in the transaction's [`Journal`]. The steps run
//! when the transaction rolls back or fails to commit, and are discarded on
//! a successful commit.

pub mod manager;
pub mod memory;

use std::any::Any;

use async_trait::async_trait;
use thiserror::Error;

pub use manager::{DatabaseManager, PgAccessTokenStore, PgTransaction, PgUserStore};
pub use memory::MemoryDatabase;

/// Errors from the database layer
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Invalid database URL")]
    InvalidDatabaseUrl,

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Commit failed: {0}")]
    CommitFailed(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Compensation for writes applied outside the database connection.
#[async_trait]
pub trait Undo: Send + Sync {
    async fn undo(self: Box<Self>);

    /// Undo from a context that cannot await (a transaction dropped while open)
    fn undo_detached(self: Box<Self>);
}

/// Undo steps recorded against one transaction, keyed by collaborator.
#[derive(Default)]
pub struct Journal {
    steps: Vec<(&'static str, Box<dyn Undo>)>,
}

impl Journal {
    pub fn contains(&self, key: &str) -> bool {
        self.steps.iter().any(|(k, _)| *k == key)
    }

    pub fn record(&mut self, key: &'static str, step: Box<dyn Undo>) {
        self.steps.push((key, step));
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Keep the writes: forget every step without running it
    pub fn settle(&mut self) {
        self.steps.clear();
    }

    /// Run every step, newest first
    pub async fn unwind(&mut self) {
        while let Some((_, step)) = self.steps.pop() {
            step.undo().await;
        }
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        while let Some((_, step)) = self.steps.pop() {
            step.undo_detached();
        }
    }
}

/// A request-scoped unit of work.
#[async_trait]
pub trait Transaction: Send + Sync {
    async fn commit(self: Box<Self>) -> Result<(), DatabaseError>;

    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError>;

    fn journal(&mut self) -> &mut Journal;

    /// Lets collaborator implementations reach their concrete connection type.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[async_trait]
pub trait Database: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, DatabaseError>;

    async fn health_check(&self) -> Result<(), DatabaseError>;
}
