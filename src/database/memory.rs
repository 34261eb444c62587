use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use super::{Database, DatabaseError, Journal, Transaction};

#[derive(Default)]
struct Counters {
    begun: AtomicUsize,
    committed: AtomicUsize,
    rolled_back: AtomicUsize,
    fail_commits: AtomicBool,
}

/// In-process transaction boundary used by the development backend and tests.
///
/// The in-memory services journal their writes on the transaction; a
/// rollback, a rejected commit or a drop while open runs the journal.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    counters: Arc<Counters>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_commits(&self, fail: bool) {
        self.counters.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub fn begun(&self) -> usize {
        self.counters.begun.load(Ordering::SeqCst)
    }

    pub fn committed(&self) -> usize {
        self.counters.committed.load(Ordering::SeqCst)
    }

    pub fn rolled_back(&self) -> usize {
        self.counters.rolled_back.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn begin(&self) -> Result<Box<dyn Transaction>, DatabaseError> {
        self.counters.begun.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryTransaction {
            counters: self.counters.clone(),
            journal: Journal::default(),
            finished: false,
        }))
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}

pub struct MemoryTransaction {
    counters: Arc<Counters>,
    journal: Journal,
    finished: bool,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        let mut this = self;
        this.finished = true;
        if this.counters.fail_commits.load(Ordering::SeqCst) {
            this.journal.unwind().await;
            this.counters.rolled_back.fetch_add(1, Ordering::SeqCst);
            return Err(DatabaseError::CommitFailed("commit rejected".to_string()));
        }
        this.journal.settle();
        this.counters.committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError> {
        let mut this = self;
        this.finished = true;
        this.journal.unwind().await;
        this.counters.rolled_back.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn journal(&mut self) -> &mut Journal {
        &mut self.journal
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        // Dropping an open transaction rolls it back; the journal undoes itself
        if !self.finished {
            self.counters.rolled_back.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Undo;

    struct Flag(Arc<AtomicUsize>);

    #[async_trait]
    impl Undo for Flag {
        async fn undo(self: Box<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn undo_detached(self: Box<Self>) {
            self.0.fetch_add(10, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn tracks_commit_and_implicit_rollback() {
        let db = MemoryDatabase::new();

        let tx = db.begin().await.unwrap();
        tx.commit().await.unwrap();

        let tx = db.begin().await.unwrap();
        drop(tx);

        assert_eq!(db.begun(), 2);
        assert_eq!(db.committed(), 1);
        assert_eq!(db.rolled_back(), 1);
    }

    #[tokio::test]
    async fn injected_commit_failure() {
        let db = MemoryDatabase::new();
        db.fail_commits(true);
        let tx = db.begin().await.unwrap();
        assert!(matches!(tx.commit().await, Err(DatabaseError::CommitFailed(_))));
        assert_eq!(db.committed(), 0);
        assert_eq!(db.rolled_back(), 1);
    }

    #[tokio::test]
    async fn journal_runs_unless_committed() {
        let db = MemoryDatabase::new();
        let undone = Arc::new(AtomicUsize::new(0));

        let mut tx = db.begin().await.unwrap();
        tx.journal().record("test", Box::new(Flag(undone.clone())));
        assert!(tx.journal().contains("test"));
        tx.commit().await.unwrap();
        assert_eq!(undone.load(Ordering::SeqCst), 0);

        let mut tx = db.begin().await.unwrap();
        tx.journal().record("test", Box::new(Flag(undone.clone())));
        tx.rollback().await.unwrap();
        assert_eq!(undone.load(Ordering::SeqCst), 1);

        db.fail_commits(true);
        let mut tx = db.begin().await.unwrap();
        tx.journal().record("test", Box::new(Flag(undone.clone())));
        assert!(tx.commit().await.is_err());
        assert_eq!(undone.load(Ordering::SeqCst), 2);

        let mut tx = db.begin().await.unwrap();
        tx.journal().record("test", Box::new(Flag(undone.clone())));
        drop(tx);
        assert_eq!(undone.load(Ordering::SeqCst), 12);
    }
}
