use std::sync::Arc;

use repost_core::subscription::NewSubscription;
use repost_core::task::{DownloadTask, UploadTask};
use repost_engine::bus::Event;
use repost_engine::repo::{HubRepository, TaskRepository};
use repost_engine::scheduler::{SchedulerEvents, SchedulerHandle};
use repost_engine::subscriber::{Subscriber, SubscriberEvents};

/// Every event channel the daemon wires at startup.
///
/// The subscriber's `new_download` is the download scheduler's inbound
/// `new_task` channel, so hub updates flow straight into the queue.
#[derive(Clone)]
pub struct Channels {
    pub download: SchedulerEvents<DownloadTask>,
    pub upload: SchedulerEvents<UploadTask>,
    pub subscribe: Event<NewSubscription>,
    pub unsubscribe: Event<i64>,
    pub subscriber: SubscriberEvents,
}

impl Channels {
    pub fn new() -> Self {
        let download = SchedulerEvents::labeled("download");
        let upload = SchedulerEvents::labeled("upload");
        let subscriber = SubscriberEvents {
            subscribe_complete: Event::new("subscribe_complete"),
            unsubscribe_complete: Event::new("unsubscribe_complete"),
            feed_broadcast: Event::new("feed_broadcast"),
            new_download: download.new_task.clone(),
        };
        Self {
            download,
            upload,
            subscribe: Event::new("subscribe"),
            unsubscribe: Event::new("unsubscribe"),
            subscriber,
        }
    }
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared state behind every route handler.
#[derive(Clone)]
pub struct AppState {
    pub download: Option<SchedulerHandle<DownloadTask>>,
    pub upload: Option<SchedulerHandle<UploadTask>>,
    pub download_repo: Arc<dyn TaskRepository<DownloadTask>>,
    pub upload_repo: Arc<dyn TaskRepository<UploadTask>>,
    pub hubs: Arc<dyn HubRepository>,
    pub subscriber: Option<Arc<Subscriber>>,
    pub channels: Channels,
    pub app_token: Option<String>,
    pub auto_download_wait_time: Option<i64>,
    pub auto_upload_wait_time: Option<i64>,
}
