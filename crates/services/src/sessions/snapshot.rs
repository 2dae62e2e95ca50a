use std::sync::Arc;

use quiz_core::model::{SessionSnapshot, UserId};
use storage::repository::{KeyValueStore, StorageError, load_json, save_json};

/// Saved in-flight session per user; at most one at a time.
#[derive(Clone)]
pub struct SnapshotStore {
    store: Arc<dyn KeyValueStore>,
}

impl SnapshotStore {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn key(user: &UserId) -> String {
        format!("session_snapshot:{user}")
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the snapshot cannot be written.
    pub async fn save(&self, user: &UserId, snapshot: &SessionSnapshot) -> Result<(), StorageError> {
        save_json(self.store.as_ref(), &Self::key(user), snapshot).await
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the snapshot cannot be read or decoded.
    pub async fn load(&self, user: &UserId) -> Result<Option<SessionSnapshot>, StorageError> {
        load_json(self.store.as_ref(), &Self::key(user)).await
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the snapshot cannot be removed.
    pub async fn clear(&self, user: &UserId) -> Result<(), StorageError> {
        self.store.remove(&Self::key(user)).await
    }
}
