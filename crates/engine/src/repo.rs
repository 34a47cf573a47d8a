//! Repository seams the engine talks to. Backends live elsewhere; the
//! engine only assumes async CRUD over its record types.

use async_trait::async_trait;
use repost_core::subscription::{EditHub, Hub, NewHub, NewSubscription, Subscription};
use repost_core::task::{TaskFilter, TaskRecord};

/// Errors surfaced by repository implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record {0} not found")]
    NotFound(i64),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    /// Whether this is a lookup miss rather than a backend fault.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Async CRUD over one task kind.
#[async_trait]
pub trait TaskRepository<T: TaskRecord>: Send + Sync {
    /// List tasks, optionally restricted by a state filter.
    async fn get_multiple(&self, filter: Option<&TaskFilter>) -> Result<Vec<T>, StoreError>;
    async fn get(&self, id: i64) -> Result<T, StoreError>;
    async fn create(&self, new: T::New) -> Result<T, StoreError>;
    /// Overwrite the persisted record with `task`.
    async fn update(&self, task: &T) -> Result<T, StoreError>;
    /// Merge the non-`None` fields of `edit` onto the persisted record.
    async fn merge(&self, edit: T::Edit) -> Result<T, StoreError>;
    /// Delete by id; `false` when the record was already gone.
    async fn delete(&self, id: i64) -> Result<bool, StoreError>;
}

/// Async CRUD over WebSub hubs.
#[async_trait]
pub trait HubRepository: Send + Sync {
    async fn get_multiple(&self) -> Result<Vec<Hub>, StoreError>;
    async fn get(&self, id: i64) -> Result<Hub, StoreError>;
    async fn create(&self, new: NewHub) -> Result<Hub, StoreError>;
    async fn merge(&self, id: i64, edit: EditHub) -> Result<Hub, StoreError>;
    /// Delete the hub and every subscription referencing it.
    async fn delete(&self, id: i64) -> Result<bool, StoreError>;
}

/// Async CRUD over subscriptions.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn get_multiple(&self) -> Result<Vec<Subscription>, StoreError>;
    async fn get(&self, id: i64) -> Result<Subscription, StoreError>;
    /// Persist a new subscription with its sealed secret.
    async fn create(
        &self,
        new: NewSubscription,
        encrypted_secret: String,
    ) -> Result<Subscription, StoreError>;
    async fn delete(&self, id: i64) -> Result<bool, StoreError>;
}

/// Archive of raw update payloads.
#[async_trait]
pub trait FeedArchive: Send + Sync {
    /// Store one raw XML payload, optionally linked to the task it produced.
    async fn store(&self, download_task_id: Option<i64>, xml: &str) -> Result<i64, StoreError>;
}
