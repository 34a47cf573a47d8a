//! The worker seam: one worker performs the I/O for one task.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// Runtime executor for a single task.
///
/// `start` blocks until the work is done. `pause`, `resume` and `cancel` are
/// idempotent; `cancel` must interrupt a running or paused worker and unblock
/// the pending `start`. A worker reclaimed after a pause continues its
/// existing job when `start` is called again.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn start(&self) -> anyhow::Result<()>;
    async fn pause(&self);
    async fn resume(&self);
    async fn cancel(&self);

    /// Completion estimate in `[0, 1]`.
    fn progress(&self) -> f32 {
        0.0
    }
}

/// Builds a worker for a task. Implemented by site-specific adapters.
pub trait WorkerFactory<T>: Send + Sync {
    fn build(&self, task: &T) -> Arc<dyn Worker>;
}

impl<T, F> WorkerFactory<T> for F
where
    F: Fn(&T) -> Arc<dyn Worker> + Send + Sync,
{
    fn build(&self, task: &T) -> Arc<dyn Worker> {
        self(task)
    }
}

/// Passive cache-directory capacity check consulted by download workers
/// before they start I/O.
#[derive(Debug, Clone)]
pub struct CacheGuard {
    path: PathBuf,
    max_size: u64,
    check_interval: Duration,
}

impl CacheGuard {
    pub fn new(path: PathBuf, max_size: u64, check_interval: Duration) -> Self {
        Self {
            path,
            max_size,
            check_interval,
        }
    }

    /// Wait until the cache directory has room for `needed` more bytes.
    ///
    /// Workers drain the directory as they hand artifacts off, so this polls
    /// rather than reserving.
    pub async fn wait_for_space(&self, needed: u64) {
        loop {
            let used = dir_size(&self.path).await;
            if used + needed <= self.max_size {
                return;
            }
            tracing::debug!(
                path = %self.path.display(),
                used,
                needed,
                max = self.max_size,
                "cache full, waiting for space"
            );
            tokio::time::sleep(self.check_interval).await;
        }
    }
}

async fn dir_size(path: &Path) -> u64 {
    let mut total = 0u64;
    let mut pending = vec![path.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if meta.is_dir() {
                pending.push(entry.path());
            } else {
                total += meta.len();
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dir_size_sums_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a"), b"12345").await.unwrap();
        tokio::fs::create_dir(dir.path().join("sub")).await.unwrap();
        tokio::fs::write(dir.path().join("sub/b"), b"123").await.unwrap();
        assert_eq!(dir_size(dir.path()).await, 8);
    }

    #[tokio::test]
    async fn guard_returns_once_space_is_free() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("blob"), vec![0u8; 64]).await.unwrap();
        let guard = CacheGuard::new(dir.path().to_path_buf(), 100, Duration::from_millis(10));

        // Fits immediately.
        guard.wait_for_space(10).await;

        // Needs the blob gone first.
        let waiter = {
            let guard = guard.clone();
            tokio::spawn(async move { guard.wait_for_space(80).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());
        tokio::fs::remove_file(dir.path().join("blob")).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
