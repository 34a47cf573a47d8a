use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{ArgAction, Parser};

/// Daemon configuration. Every flag can also come from the environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "repostd", version, about = "Self-hosted repost daemon")]
pub struct Config {
    #[arg(long, env = "REPOST_BIND", default_value = "127.0.0.1:8011")]
    pub bind: SocketAddr,

    #[arg(long, env = "REPOST_SQLITE_PATH", default_value = "repost.db")]
    pub sqlite_path: PathBuf,

    /// Shared API token; requests without it are rejected. Unset disables auth.
    #[arg(long, env = "REPOST_APP_TOKEN")]
    pub app_token: Option<String>,

    /// Public base URL hubs reach this server on for validation callbacks.
    #[arg(long, env = "REPOST_CALL_BACK_URL", default_value = "http://127.0.0.1:8011")]
    pub call_back_url: String,

    /// Verify token echoed by hubs during validation; random when unset.
    #[arg(long, env = "REPOST_SUBSCRIPTION_TOKEN")]
    pub subscription_token: Option<String>,

    /// Master key sealing per-subscription secrets at rest.
    #[arg(long, env = "REPOST_WEB_HUB_SECRET_KEY", default_value = "insecure-dev-key")]
    pub web_hub_secret_key: String,

    /// Seconds to wait for a hub's validation callback.
    #[arg(long, env = "REPOST_VALIDATION_INTERVAL", default_value_t = 60)]
    pub validation_interval: u64,

    #[arg(long, env = "REPOST_DOWNLOAD_MAX_CONCURRENT", default_value_t = 3)]
    pub download_max_concurrent: usize,

    #[arg(long, env = "REPOST_UPLOAD_MAX_CONCURRENT", default_value_t = 2)]
    pub upload_max_concurrent: usize,

    /// Minutes before a failed download is retried.
    #[arg(long, env = "REPOST_DOWNLOAD_RETRY_DELAY", default_value_t = 5.0)]
    pub download_retry_delay: f64,

    /// Minutes before a failed upload is retried.
    #[arg(long, env = "REPOST_UPLOAD_RETRY_DELAY", default_value_t = 5.0)]
    pub upload_retry_delay: f64,

    #[arg(long, env = "REPOST_DOWNLOAD_AUTO_RETRY", default_value_t = true, action = ArgAction::Set)]
    pub download_auto_retry: bool,

    #[arg(long, env = "REPOST_UPLOAD_AUTO_RETRY", default_value_t = true, action = ArgAction::Set)]
    pub upload_auto_retry: bool,

    #[arg(long, env = "REPOST_ENABLE_AUTO_SUBSCRIPTION", default_value_t = true, action = ArgAction::Set)]
    pub enable_auto_subscription: bool,

    #[arg(long, env = "REPOST_ENABLE_AUTO_DOWNLOAD", default_value_t = true, action = ArgAction::Set)]
    pub enable_auto_download: bool,

    #[arg(long, env = "REPOST_ENABLE_AUTO_UPLOAD", default_value_t = false, action = ArgAction::Set)]
    pub enable_auto_upload: bool,

    /// Seconds auto-created download tasks wait before starting.
    #[arg(long, env = "REPOST_AUTO_DOWNLOAD_WAIT_TIME")]
    pub auto_download_wait_time: Option<i64>,

    /// Seconds auto-created upload tasks wait before starting.
    #[arg(long, env = "REPOST_AUTO_UPLOAD_WAIT_TIME")]
    pub auto_upload_wait_time: Option<i64>,

    #[arg(long, env = "REPOST_CACHE_PATH", default_value = "cache")]
    pub cache_path: PathBuf,

    /// Cache directory budget in bytes.
    #[arg(long, env = "REPOST_CACHE_MAX_SIZE", default_value_t = 10 * 1024 * 1024 * 1024)]
    pub cache_max_size: u64,

    /// Seconds between re-checks while a worker waits for cache space.
    #[arg(long, env = "REPOST_CACHE_CHECK_SIZE_INTERVAL", default_value_t = 30)]
    pub cache_check_size_interval: u64,
}

impl Config {
    /// Defaults with nothing read from the process environment or argv.
    pub fn for_tests() -> Self {
        Config::parse_from(["repostd"])
    }
}
