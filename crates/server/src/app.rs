//! Process wiring: builds the scheduler pair, the subscriber, and the
//! shared state the routes run against.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio::task::JoinHandle;

use repost_core::secret::SecretSealer;
use repost_core::task::{DownloadTask, UploadTask};
use repost_engine::scheduler::{Scheduler, SchedulerConfig};
use repost_engine::subscriber::{SiteAdapter, Subscriber, SubscriberConfig, generate_secret};
use repost_engine::worker::{CacheGuard, WorkerFactory};
use repost_store::{DownloadTaskStore, FeedXmlStore, HubStore, SubscriptionStore, UploadTaskStore};

use crate::cli::Config;
use crate::sites::YoutubeAdapter;
use crate::state::{AppState, Channels};
use crate::workers;

/// Worker factories for both scheduler kinds. Tests substitute their own.
pub struct Factories {
    pub download: Arc<dyn WorkerFactory<DownloadTask>>,
    pub upload: Arc<dyn WorkerFactory<UploadTask>>,
}

impl Factories {
    pub fn from_config(cfg: &Config) -> Self {
        let cache = CacheGuard::new(
            cfg.cache_path.clone(),
            cfg.cache_max_size,
            Duration::from_secs(cfg.cache_check_size_interval),
        );
        Self {
            download: workers::download_factory(cache),
            upload: workers::upload_factory(reqwest::Client::new()),
        }
    }
}

/// A running daemon: shared state plus the background scheduler loops.
pub struct App {
    pub state: AppState,
    scheduler_tasks: Vec<JoinHandle<()>>,
}

impl App {
    /// Stop schedulers and polling loops, waiting briefly for the loops to
    /// wind down.
    pub async fn stop(self) {
        if let Some(handle) = &self.state.download {
            handle.shutdown();
        }
        if let Some(handle) = &self.state.upload {
            handle.shutdown();
        }
        if let Some(subscriber) = &self.state.subscriber {
            subscriber.stop_all().await;
        }
        for task in self.scheduler_tasks {
            let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
        }
    }
}

/// Open the database and assemble every enabled subsystem.
pub async fn start(cfg: &Config, factories: Factories) -> anyhow::Result<App> {
    let pool = repost_store::connect(&cfg.sqlite_path)
        .await
        .with_context(|| format!("open database {}", cfg.sqlite_path.display()))?;
    repost_store::create_tables(&pool).await?;

    let channels = Channels::new();
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .context("build http client")?;

    let download_repo = Arc::new(DownloadTaskStore::new(pool.clone()));
    let upload_repo = Arc::new(UploadTaskStore::new(pool.clone()));
    let hubs = Arc::new(HubStore::new(pool.clone()));
    let mut scheduler_tasks = Vec::new();

    let download = if cfg.enable_auto_download {
        let mut scheduler = Scheduler::new(SchedulerConfig {
            name: "download scheduler".to_string(),
            repo: download_repo.clone(),
            factory: factories.download,
            events: channels.download.clone(),
            max_concurrent: cfg.download_max_concurrent,
            retry_delay_mins: cfg.download_retry_delay,
            auto_retry: cfg.download_auto_retry,
            feed_to_new: None,
        })?;
        scheduler.load_tasks().await?;
        let handle = scheduler.handle();
        scheduler_tasks.push(tokio::spawn(scheduler.run()));
        Some(handle)
    } else {
        None
    };

    let upload = if cfg.enable_auto_upload {
        let mut scheduler = Scheduler::new(SchedulerConfig {
            name: "upload scheduler".to_string(),
            repo: upload_repo.clone(),
            factory: factories.upload,
            events: channels.upload.clone(),
            max_concurrent: cfg.upload_max_concurrent,
            retry_delay_mins: cfg.upload_retry_delay,
            auto_retry: cfg.upload_auto_retry,
            feed_to_new: None,
        })?;
        scheduler.load_tasks().await?;
        let handle = scheduler.handle();
        scheduler_tasks.push(tokio::spawn(scheduler.run()));
        Some(handle)
    } else {
        None
    };

    let subscriber = if cfg.enable_auto_subscription {
        let subscription_token = cfg
            .subscription_token
            .clone()
            .unwrap_or_else(generate_secret);
        let adapters: HashMap<String, Arc<dyn SiteAdapter>> = HashMap::from([(
            "youtube".to_string(),
            Arc::new(YoutubeAdapter::new(cfg.auto_download_wait_time)) as Arc<dyn SiteAdapter>,
        )]);
        let subscriber = Subscriber::new(
            http,
            SubscriberConfig {
                callback_url: cfg.call_back_url.clone(),
                subscription_token,
                validation_interval: Duration::from_secs(cfg.validation_interval),
            },
            SecretSealer::new(&cfg.web_hub_secret_key),
            hubs.clone(),
            Arc::new(SubscriptionStore::new(pool.clone())),
            Arc::new(FeedXmlStore::new(pool.clone())),
            adapters,
            channels.subscriber.clone(),
        );
        subscriber.load_subscriptions().await?;

        {
            let subscriber = subscriber.clone();
            channels.subscribe.bind(move |new| {
                let subscriber = subscriber.clone();
                async move {
                    subscriber.subscribe(new).await?;
                    Ok(())
                }
            });
        }
        {
            let subscriber = subscriber.clone();
            channels.unsubscribe.bind(move |id| {
                let subscriber = subscriber.clone();
                async move {
                    subscriber.unsubscribe(id).await?;
                    Ok(())
                }
            });
        }
        Some(subscriber)
    } else {
        None
    };

    channels.subscriber.feed_broadcast.bind(|feed| async move {
        tracing::info!(site = %feed.site, video = %feed.video_id, title = %feed.video_title, "new feed");
        Ok(())
    });

    Ok(App {
        state: AppState {
            download,
            upload,
            download_repo,
            upload_repo,
            hubs,
            subscriber,
            channels,
            app_token: cfg.app_token.clone(),
            auto_download_wait_time: cfg.auto_download_wait_time,
            auto_upload_wait_time: cfg.auto_upload_wait_time,
        },
        scheduler_tasks,
    })
}
