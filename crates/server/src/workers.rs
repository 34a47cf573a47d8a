//! Concrete workers: the `yt-dlp` subprocess wrapper for downloads and a
//! streaming HTTP uploader, plus the per-site factories.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tokio::process::Command;
use tokio::sync::Notify;

use repost_core::task::{DownloadTask, UploadTask};
use repost_engine::worker::{CacheGuard, Worker, WorkerFactory};

const DEFAULT_FORMAT: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/bestvideo+bestaudio";

fn send_signal(pid: i32, signal: libc::c_int) {
    // SAFETY: kill with a valid signal number; a stale pid is at worst ESRCH.
    unsafe {
        libc::kill(pid, signal);
    }
}

fn process_alive(pid: i32) -> bool {
    // SAFETY: signal 0 only probes for existence.
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Runs one download through a `yt-dlp` child process.
///
/// Pause and resume map to SIGSTOP/SIGCONT so the child survives a
/// suspension; a worker reclaimed after suspension continues the stopped
/// process instead of spawning a new one.
pub struct YtDlpWorker {
    task: DownloadTask,
    cache: CacheGuard,
    pid: AtomicI32,
    cancelled: AtomicBool,
    progress: Arc<AtomicU32>,
}

impl YtDlpWorker {
    pub fn new(task: DownloadTask, cache: CacheGuard) -> Self {
        Self {
            task,
            cache,
            pid: AtomicI32::new(0),
            cancelled: AtomicBool::new(false),
            progress: Arc::new(AtomicU32::new(0)),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new("yt-dlp");
        if self.task.with_thumbnail {
            command.arg("--write-thumbnail");
        }
        if self.task.with_description {
            command.arg("--write-description");
        }
        if self.task.with_subtitles {
            command.arg("--write-subs");
        }
        let output = self.task.file_path().with_extension("mp4");
        command
            .arg("--newline")
            .arg("-f")
            .arg(self.task.format.as_deref().unwrap_or(DEFAULT_FORMAT))
            .arg("-o")
            .arg(output)
            .arg(&self.task.url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(false);
        command
    }

    /// Wait out a process we no longer own a `Child` handle for.
    async fn wait_for_reclaimed(&self, pid: i32) -> anyhow::Result<()> {
        while process_alive(pid) {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        self.pid.store(0, Ordering::SeqCst);
        if self.cancelled.load(Ordering::SeqCst) {
            anyhow::bail!("download cancelled");
        }
        Ok(())
    }
}

fn parse_progress(line: &str) -> Option<f32> {
    let rest = line.strip_prefix("[download]")?.trim_start();
    let percent = rest.split('%').next()?;
    percent
        .trim()
        .parse::<f32>()
        .ok()
        .map(|value| (value / 100.0).clamp(0.0, 1.0))
}

#[async_trait]
impl Worker for YtDlpWorker {
    async fn start(&self) -> anyhow::Result<()> {
        let existing = self.pid.load(Ordering::SeqCst);
        if existing != 0 {
            // Reclaimed after a suspension: continue the stopped child.
            send_signal(existing, libc::SIGCONT);
            return self.wait_for_reclaimed(existing).await;
        }

        self.cache.wait_for_space(0).await;
        let mut child = self.command().spawn().context("spawn yt-dlp")?;
        let pid = child.id().context("yt-dlp pid unavailable")? as i32;
        self.pid.store(pid, Ordering::SeqCst);

        if let Some(stdout) = child.stdout.take() {
            let progress = self.progress.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(fraction) = parse_progress(&line) {
                        progress.store(fraction.to_bits(), Ordering::Relaxed);
                    }
                }
            });
        }

        let status = child.wait().await.context("wait for yt-dlp")?;
        self.pid.store(0, Ordering::SeqCst);
        if self.cancelled.load(Ordering::SeqCst) {
            anyhow::bail!("download cancelled");
        }
        anyhow::ensure!(status.success(), "yt-dlp exited with {status}");
        self.progress.store(1.0f32.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    async fn pause(&self) {
        let pid = self.pid.load(Ordering::SeqCst);
        if pid != 0 {
            send_signal(pid, libc::SIGSTOP);
        }
    }

    async fn resume(&self) {
        let pid = self.pid.load(Ordering::SeqCst);
        if pid != 0 {
            send_signal(pid, libc::SIGCONT);
        }
    }

    async fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let pid = self.pid.load(Ordering::SeqCst);
        if pid != 0 {
            send_signal(pid, libc::SIGKILL);
        }
    }

    fn progress(&self) -> f32 {
        f32::from_bits(self.progress.load(Ordering::Relaxed))
    }
}

/// Uploads the task's artifact to its destination URL with one POST.
pub struct HttpUploadWorker {
    task: UploadTask,
    http: reqwest::Client,
    cancelled: AtomicBool,
    cancel: Notify,
}

impl HttpUploadWorker {
    pub fn new(task: UploadTask, http: reqwest::Client) -> Self {
        Self {
            task,
            http,
            cancelled: AtomicBool::new(false),
            cancel: Notify::new(),
        }
    }
}

#[async_trait]
impl Worker for HttpUploadWorker {
    async fn start(&self) -> anyhow::Result<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            anyhow::bail!("upload cancelled");
        }
        let path = self.task.file_path();
        let body = tokio::fs::read(&path)
            .await
            .with_context(|| format!("read artifact {}", path.display()))?;
        let request = self
            .http
            .post(&self.task.destination)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send();
        tokio::select! {
            response = request => {
                let response = response.context("send upload")?;
                let status = response.status();
                anyhow::ensure!(status.is_success(), "destination returned http {status}");
                Ok(())
            }
            _ = self.cancel.notified() => anyhow::bail!("upload cancelled"),
        }
    }

    async fn pause(&self) {
        // A single POST cannot be held mid-flight; pausing an upload only
        // matters once it is suspended and restarted.
    }

    async fn resume(&self) {}

    async fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel.notify_one();
    }
}

/// Fails immediately; used when no worker is registered for a task's site.
struct UnsupportedWorker {
    reason: String,
}

#[async_trait]
impl Worker for UnsupportedWorker {
    async fn start(&self) -> anyhow::Result<()> {
        anyhow::bail!("{}", self.reason)
    }

    async fn pause(&self) {}

    async fn resume(&self) {}

    async fn cancel(&self) {}
}

/// Per-site download worker registry.
pub fn download_factory(cache: CacheGuard) -> Arc<dyn WorkerFactory<DownloadTask>> {
    Arc::new(move |task: &DownloadTask| -> Arc<dyn Worker> {
        match task.site.as_str() {
            "youtube" => Arc::new(YtDlpWorker::new(task.clone(), cache.clone())),
            other => Arc::new(UnsupportedWorker {
                reason: format!("no downloader registered for site {other:?}"),
            }),
        }
    })
}

/// Upload worker factory.
pub fn upload_factory(http: reqwest::Client) -> Arc<dyn WorkerFactory<UploadTask>> {
    Arc::new(move |task: &UploadTask| -> Arc<dyn Worker> {
        Arc::new(HttpUploadWorker::new(task.clone(), http.clone()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_lines_parse_to_fractions() {
        assert_eq!(parse_progress("[download]  42.7% of 10MiB"), Some(0.427));
        assert_eq!(parse_progress("[download] 100% of 10MiB"), Some(1.0));
        assert_eq!(parse_progress("[youtube] extracting"), None);
        assert_eq!(parse_progress("[download] Destination: clip.mp4"), None);
    }

    #[tokio::test]
    async fn unsupported_site_fails_fast() {
        let factory = download_factory(CacheGuard::new(
            std::env::temp_dir(),
            u64::MAX,
            Duration::from_secs(1),
        ));
        let mut task = DownloadTask::from_new(
            1,
            repost_core::task::NewDownloadTask::new("clip", "https://example.com", "dailymotion"),
        );
        task.path = std::env::temp_dir().display().to_string();
        let worker = factory.build(&task);
        let err = worker.start().await.unwrap_err();
        assert!(err.to_string().contains("dailymotion"));
    }
}
