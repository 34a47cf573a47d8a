//! Shared fixtures for engine tests: an in-memory task repository and a
//! remotely controllable mock worker.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc, oneshot};

use repost_core::task::{DownloadTask, TaskFilter, TaskRecord};

use crate::repo::{StoreError, TaskRepository};
use crate::worker::{Worker, WorkerFactory};

pub(crate) struct MemoryRepo {
    tasks: std::sync::Mutex<HashMap<i64, DownloadTask>>,
    next_id: AtomicI64,
}

impl MemoryRepo {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            tasks: std::sync::Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        })
    }

    pub(crate) fn insert(&self, task: DownloadTask) {
        let mut tasks = self.tasks.lock().unwrap();
        self.next_id.fetch_max(task.id + 1, Ordering::SeqCst);
        tasks.insert(task.id, task);
    }
}

#[async_trait]
impl TaskRepository<DownloadTask> for MemoryRepo {
    async fn get_multiple(
        &self,
        filter: Option<&TaskFilter>,
    ) -> Result<Vec<DownloadTask>, StoreError> {
        let tasks = self.tasks.lock().unwrap();
        let mut all: Vec<DownloadTask> = tasks
            .values()
            .filter(|t| filter.is_none_or(|f| f.matches(t.state)))
            .cloned()
            .collect();
        all.sort_by_key(|t| t.id);
        Ok(all)
    }

    async fn get(&self, id: i64) -> Result<DownloadTask, StoreError> {
        self.tasks
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn create(
        &self,
        new: <DownloadTask as TaskRecord>::New,
    ) -> Result<DownloadTask, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let task = DownloadTask::from_new(id, new);
        self.tasks.lock().unwrap().insert(id, task.clone());
        Ok(task)
    }

    async fn update(&self, task: &DownloadTask) -> Result<DownloadTask, StoreError> {
        let mut tasks = self.tasks.lock().unwrap();
        if !tasks.contains_key(&task.id) {
            return Err(StoreError::NotFound(task.id));
        }
        tasks.insert(task.id, task.clone());
        Ok(task.clone())
    }

    async fn merge(
        &self,
        edit: <DownloadTask as TaskRecord>::Edit,
    ) -> Result<DownloadTask, StoreError> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get_mut(&edit.id)
            .ok_or(StoreError::NotFound(edit.id))?;
        task.apply_edit(edit);
        Ok(task.clone())
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.tasks.lock().unwrap().remove(&id).is_some())
    }
}

pub(crate) struct MockWorker {
    pub(crate) id: i64,
    started_tx: mpsc::UnboundedSender<i64>,
    release: std::sync::Mutex<Option<oneshot::Sender<anyhow::Result<()>>>>,
    cancelled: Notify,
    auto_fail: bool,
    pub(crate) paused: AtomicBool,
    pub(crate) start_count: AtomicUsize,
    pub(crate) cancel_count: AtomicUsize,
}

#[async_trait]
impl Worker for MockWorker {
    async fn start(&self) -> anyhow::Result<()> {
        self.start_count.fetch_add(1, Ordering::SeqCst);
        let _ = self.started_tx.send(self.id);
        if self.auto_fail {
            anyhow::bail!("mock worker failed");
        }
        let (tx, rx) = oneshot::channel();
        *self.release.lock().unwrap() = Some(tx);
        tokio::select! {
            result = rx => result.unwrap_or(Ok(())),
            _ = self.cancelled.notified() => anyhow::bail!("mock worker cancelled"),
        }
    }

    async fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    async fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    async fn cancel(&self) {
        self.cancel_count.fetch_add(1, Ordering::SeqCst);
        self.cancelled.notify_one();
    }
}

/// Builds mock workers and lets tests observe and complete them.
pub(crate) struct Harness {
    pub(crate) started_rx: mpsc::UnboundedReceiver<i64>,
    started_tx: mpsc::UnboundedSender<i64>,
    workers: Arc<std::sync::Mutex<HashMap<i64, Arc<MockWorker>>>>,
    auto_fail: Arc<AtomicBool>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        Self {
            started_rx,
            started_tx,
            workers: Arc::new(std::sync::Mutex::new(HashMap::new())),
            auto_fail: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn set_auto_fail(&self, fail: bool) {
        self.auto_fail.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn factory(&self) -> Arc<dyn WorkerFactory<DownloadTask>> {
        let workers = self.workers.clone();
        let started_tx = self.started_tx.clone();
        let auto_fail = self.auto_fail.clone();
        Arc::new(move |task: &DownloadTask| {
            let worker = Arc::new(MockWorker {
                id: task.id,
                started_tx: started_tx.clone(),
                release: std::sync::Mutex::new(None),
                cancelled: Notify::new(),
                auto_fail: auto_fail.load(Ordering::SeqCst),
                paused: AtomicBool::new(false),
                start_count: AtomicUsize::new(0),
                cancel_count: AtomicUsize::new(0),
            });
            workers.lock().unwrap().insert(task.id, worker.clone());
            worker as Arc<dyn Worker>
        })
    }

    pub(crate) fn worker(&self, id: i64) -> Arc<MockWorker> {
        self.workers
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .expect("worker was never built")
    }

    pub(crate) fn built_count(&self) -> usize {
        self.workers.lock().unwrap().len()
    }

    pub(crate) fn release(&self, id: i64, result: anyhow::Result<()>) {
        let tx = self.worker(id).release.lock().unwrap().take();
        if let Some(tx) = tx {
            let _ = tx.send(result);
        }
    }
}
