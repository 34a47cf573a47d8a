//! SQLite persistence for the repost daemon, implementing the engine's
//! repository traits with sqlx.

mod db;
mod subscriptions;
mod tasks;

pub use db::{connect, connect_in_memory, create_tables};
pub use subscriptions::{FeedXmlStore, HubStore, SubscriptionStore};
pub use tasks::{DownloadTaskStore, UploadTaskStore};

use repost_engine::repo::StoreError;

pub(crate) fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.into())
}
