//! The task scheduler: a priority queue, wait timers, bounded live workers,
//! and bookkeeping for every task the repository knows about.
//!
//! All scheduler state is mutated from the single [`Scheduler::run`] loop.
//! Bus listeners, timers, worker completions and API calls forward commands
//! into the loop's channel; the cloneable [`SchedulerHandle`] is the only
//! outside surface.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use repost_core::subscription::Feed;
use repost_core::task::{TaskPriority, TaskRecord, TaskState};

use crate::bus::Event;
use crate::gate::{ConcurrencyGate, GateError, GatePermit};
use crate::machine;
use crate::repo::{StoreError, TaskRepository};
use crate::worker::{Worker, WorkerFactory};

/// Errors surfaced by scheduler operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("task {id} cannot be edited while {state:?}")]
    EditRejected { id: i64, state: TaskState },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("scheduler stopped")]
    Stopped,
}

impl SchedulerError {
    /// Whether the underlying cause is a repository lookup miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SchedulerError::Store(err) if err.is_not_found())
    }
}

/// External signals dispatched through the task state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSignal {
    Pause,
    Resume,
    Cancel,
    ForceStart,
    Suspend,
    Retry,
}

/// Converts a feed notification into a creation DTO, when the scheduler is
/// wired to consume feeds directly.
pub type FeedConverter<T> =
    Arc<dyn Fn(&Feed) -> Option<<T as TaskRecord>::New> + Send + Sync>;

/// The event channels one scheduler binds and emits.
///
/// Inbound events (`new_task`, `edit_task`, the signal events, `feed`) are
/// bound by the scheduler at construction; outbound events (`created`,
/// `edited`, `waiting`, `processing`, `complete`) are emitted by it. Worker
/// failures fan out on `processing`'s error channel.
pub struct SchedulerEvents<T: TaskRecord> {
    pub new_task: Event<T::New>,
    pub edit_task: Event<T::Edit>,
    pub pause: Event<T>,
    pub resume: Event<T>,
    pub cancel: Event<T>,
    pub force_start: Event<T>,
    pub suspend: Event<T>,
    pub retry: Event<T>,
    pub feed: Option<Event<Feed>>,
    pub created: Event<T>,
    pub edited: Event<T>,
    pub waiting: Event<T>,
    pub processing: Event<T>,
    pub complete: Event<T>,
}

impl<T: TaskRecord> Clone for SchedulerEvents<T> {
    fn clone(&self) -> Self {
        Self {
            new_task: self.new_task.clone(),
            edit_task: self.edit_task.clone(),
            pause: self.pause.clone(),
            resume: self.resume.clone(),
            cancel: self.cancel.clone(),
            force_start: self.force_start.clone(),
            suspend: self.suspend.clone(),
            retry: self.retry.clone(),
            feed: self.feed.clone(),
            created: self.created.clone(),
            edited: self.edited.clone(),
            waiting: self.waiting.clone(),
            processing: self.processing.clone(),
            complete: self.complete.clone(),
        }
    }
}

impl<T: TaskRecord> SchedulerEvents<T> {
    /// Build the channel group with names derived from a kind label, e.g.
    /// `"download"` yields `new_download`, `download_pause`, ...
    pub fn labeled(kind: &str) -> Self {
        Self {
            new_task: Event::new(format!("new_{kind}")),
            edit_task: Event::new(format!("edit_{kind}")),
            pause: Event::new(format!("{kind}_pause")),
            resume: Event::new(format!("{kind}_resume")),
            cancel: Event::new(format!("{kind}_cancel")),
            force_start: Event::new(format!("force_{kind}")),
            suspend: Event::new(format!("{kind}_suspend")),
            retry: Event::new(format!("{kind}_retry")),
            feed: None,
            created: Event::new(format!("{kind}_created")),
            edited: Event::new(format!("{kind}_edited")),
            waiting: Event::new(format!("{kind}_waiting")),
            processing: Event::new(format!("{kind}_processing")),
            complete: Event::new(format!("{kind}_complete")),
        }
    }
}

/// Construction parameters for one scheduler.
pub struct SchedulerConfig<T: TaskRecord> {
    pub name: String,
    pub repo: Arc<dyn TaskRepository<T>>,
    pub factory: Arc<dyn WorkerFactory<T>>,
    pub events: SchedulerEvents<T>,
    pub max_concurrent: usize,
    /// Delay before a retried task re-enters the queue, in minutes.
    pub retry_delay_mins: f64,
    pub auto_retry: bool,
    pub feed_to_new: Option<FeedConverter<T>>,
}

enum Command<T: TaskRecord> {
    Add {
        new: T::New,
        reply: Option<oneshot::Sender<Result<T, SchedulerError>>>,
    },
    Edit {
        edit: T::Edit,
        reply: Option<oneshot::Sender<Result<T, SchedulerError>>>,
    },
    Signal {
        signal: TaskSignal,
        task: T,
    },
    Feed(Feed),
    TimerFired {
        id: i64,
    },
    WorkerFinished {
        id: i64,
        result: Result<(), Arc<anyhow::Error>>,
    },
    SetConcurrent(usize),
    SetRetryDelay(f64),
    /// Wake the loop so the dispatcher runs again.
    Kick,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueEntry {
    priority: TaskPriority,
    seq: u64,
    id: i64,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Max-heap: higher priority first, then FIFO within a priority.
        match self.priority.cmp(&other.priority) {
            CmpOrdering::Equal => other.seq.cmp(&self.seq),
            ordering => ordering,
        }
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Cloneable handle for driving a running scheduler.
pub struct SchedulerHandle<T: TaskRecord> {
    cmd_tx: mpsc::UnboundedSender<Command<T>>,
}

impl<T: TaskRecord> Clone for SchedulerHandle<T> {
    fn clone(&self) -> Self {
        Self {
            cmd_tx: self.cmd_tx.clone(),
        }
    }
}

impl<T: TaskRecord> SchedulerHandle<T> {
    /// Persist and schedule a new task, returning the persisted record.
    pub async fn add_new_task_sync(&self, new: T::New) -> Result<T, SchedulerError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Add {
                new,
                reply: Some(tx),
            })
            .map_err(|_| SchedulerError::Stopped)?;
        rx.await.map_err(|_| SchedulerError::Stopped)?
    }

    /// Fire-and-forget variant of [`SchedulerHandle::add_new_task_sync`].
    pub fn add_new_task(&self, new: T::New) {
        let _ = self.cmd_tx.send(Command::Add { new, reply: None });
    }

    /// Merge an edit delta onto a persisted task.
    pub async fn edit_task_sync(&self, edit: T::Edit) -> Result<T, SchedulerError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Edit {
                edit,
                reply: Some(tx),
            })
            .map_err(|_| SchedulerError::Stopped)?;
        rx.await.map_err(|_| SchedulerError::Stopped)?
    }

    /// Fire-and-forget variant of [`SchedulerHandle::edit_task_sync`].
    pub fn edit_task(&self, edit: T::Edit) {
        let _ = self.cmd_tx.send(Command::Edit { edit, reply: None });
    }

    /// Dispatch a state-machine signal for `task`.
    pub fn signal(&self, signal: TaskSignal, task: T) {
        let _ = self.cmd_tx.send(Command::Signal { signal, task });
    }

    /// Schedule a task derived from a feed notification.
    pub fn feed(&self, feed: Feed) {
        let _ = self.cmd_tx.send(Command::Feed(feed));
    }

    /// Change the gate capacity.
    pub fn set_concurrent(&self, max_concurrent: usize) {
        let _ = self.cmd_tx.send(Command::SetConcurrent(max_concurrent));
    }

    /// Change the retry delay, in minutes.
    pub fn set_retry_delay(&self, minutes: f64) {
        let _ = self.cmd_tx.send(Command::SetRetryDelay(minutes));
    }

    /// Stop the scheduler loop, cancelling live workers and timers.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }
}

/// Scheduler state. Only the owning [`Scheduler`] loop mutates it.
pub(crate) struct SchedulerCore<T: TaskRecord> {
    pub(crate) name: String,
    pub(crate) factory: Arc<dyn WorkerFactory<T>>,
    pub(crate) gate: Arc<ConcurrencyGate>,
    pub(crate) retry_delay_secs: f64,
    repo: Arc<dyn TaskRepository<T>>,
    events: SchedulerEvents<T>,
    cmd_tx: mpsc::UnboundedSender<Command<T>>,
    feed_to_new: Option<FeedConverter<T>>,
    seq: u64,

    task_queue: BinaryHeap<QueueEntry>,
    queue: HashMap<i64, T>,
    waiting: HashMap<i64, T>,
    pub(crate) ongoing: HashMap<i64, T>,
    pub(crate) completed: HashMap<i64, T>,
    pub(crate) failed: HashMap<i64, T>,
    timer_tasks: HashMap<i64, JoinHandle<()>>,
    ongoing_workers: HashMap<i64, Arc<dyn Worker>>,
    ongoing_worker_tasks: HashMap<i64, JoinHandle<()>>,
    pub(crate) suspend_workers: HashMap<i64, Arc<dyn Worker>>,
}

impl<T: TaskRecord> SchedulerCore<T> {
    /// Write `task` back, keeping the local copy when the backend fails.
    pub(crate) async fn persist(&self, task: T) -> T {
        match self.repo.update(&task).await {
            Ok(updated) => updated,
            Err(err) => {
                tracing::warn!(
                    scheduler = %self.name,
                    id = task.id(),
                    error = %err,
                    "failed to persist task"
                );
                task
            }
        }
    }

    pub(crate) async fn destroy_task(&self, id: i64) {
        match self.repo.delete(id).await {
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(scheduler = %self.name, id, error = %err, "failed to delete task");
            }
        }
    }

    pub(crate) fn put_task_to_queue(&mut self, task: T, priority: TaskPriority) {
        self.seq += 1;
        self.task_queue.push(QueueEntry {
            priority,
            seq: self.seq,
            id: task.id(),
        });
        self.queue.insert(task.id(), task);
    }

    pub(crate) fn remove_task_from_queue(&mut self, id: i64) -> Option<T> {
        // The heap entry stays behind as a tombstone.
        self.queue.remove(&id)
    }

    pub(crate) async fn put_task_to_wait(&mut self, mut task: T, delay_secs: f64) -> T {
        let id = task.id();
        let delay_secs = delay_secs.max(0.0);
        task.set_state(TaskState::Waiting);
        task.set_wait_time(Utc::now().timestamp() + delay_secs.ceil() as i64);
        let task = self.persist(task).await;

        let cmd_tx = self.cmd_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs_f64(delay_secs)).await;
            let _ = cmd_tx.send(Command::TimerFired { id });
        });
        if let Some(stale) = self.timer_tasks.insert(id, handle) {
            stale.abort();
        }

        self.events.waiting.emit(task.clone());
        self.waiting.insert(id, task.clone());
        task
    }

    pub(crate) fn skip_wait(&mut self, id: i64) -> Option<T> {
        if let Some(timer) = self.timer_tasks.remove(&id) {
            timer.abort();
        }
        self.waiting.remove(&id)
    }

    pub(crate) async fn start_task(&mut self, mut task: T, permit: GatePermit) {
        let id = task.id();
        let worker = match self.suspend_workers.remove(&id) {
            Some(parked) => parked,
            None => self.factory.build(&task),
        };
        self.ongoing_workers.insert(id, worker.clone());
        task.set_state(TaskState::Processing);
        let task = self.persist(task).await;
        self.ongoing.insert(id, task.clone());
        self.events.processing.emit(task);

        let cmd_tx = self.cmd_tx.clone();
        let handle = tokio::spawn(async move {
            let result = worker.start().await.map_err(Arc::new);
            drop(permit);
            let _ = cmd_tx.send(Command::WorkerFinished { id, result });
        });
        self.ongoing_worker_tasks.insert(id, handle);
    }

    pub(crate) async fn pause_worker(&mut self, id: i64) {
        if let Some(worker) = self.ongoing_workers.get(&id) {
            worker.pause().await;
        }
    }

    pub(crate) async fn resume_worker(&mut self, id: i64) {
        if let Some(worker) = self.ongoing_workers.get(&id) {
            worker.resume().await;
        }
    }

    pub(crate) async fn cancel_worker(&mut self, id: i64) {
        if let Some(worker) = self.ongoing_workers.remove(&id) {
            worker.cancel().await;
            if let Some(handle) = self.ongoing_worker_tasks.remove(&id) {
                handle.abort();
            }
            self.ongoing.remove(&id);
        }
    }

    pub(crate) async fn suspend_worker(&mut self, id: i64) {
        if let Some(worker) = self.ongoing_workers.remove(&id) {
            worker.pause().await;
            if let Some(handle) = self.ongoing_worker_tasks.remove(&id) {
                handle.abort();
            }
            self.ongoing.remove(&id);
            self.suspend_workers.insert(id, worker);
        }
    }

    async fn add_new_task(&mut self, new: T::New) -> Result<T, SchedulerError> {
        let task = self.repo.create(new).await?;
        let now = Utc::now().timestamp();
        let task = if task.wait_time() > now {
            let delay = (task.wait_time() - now) as f64;
            self.put_task_to_wait(task, delay).await
        } else {
            let mut task = task;
            task.set_state(TaskState::InQueue);
            let task = self.persist(task).await;
            self.put_task_to_queue(task.clone(), TaskPriority::Default);
            task
        };
        self.events.created.emit(task.clone());
        Ok(task)
    }

    async fn edit_task(&mut self, edit: T::Edit) -> Result<T, SchedulerError> {
        let id = T::edit_id(&edit);
        let current = self.repo.get(id).await?;
        if current.state() == TaskState::Processing {
            return Err(SchedulerError::EditRejected {
                id,
                state: current.state(),
            });
        }
        let task = self.repo.merge(edit).await?;
        self.refresh_local(&task);
        self.events.edited.emit(task.clone());
        Ok(task)
    }

    /// Bring the in-memory copy of an edited task up to date.
    fn refresh_local(&mut self, task: &T) {
        let id = task.id();
        if self.queue.remove(&id).is_some() {
            self.put_task_to_queue(task.clone(), task.priority());
        } else if let Some(slot) = self.waiting.get_mut(&id) {
            *slot = task.clone();
        } else if let Some(slot) = self.ongoing.get_mut(&id) {
            *slot = task.clone();
        } else if let Some(slot) = self.completed.get_mut(&id) {
            *slot = task.clone();
        } else if let Some(slot) = self.failed.get_mut(&id) {
            *slot = task.clone();
        }
    }

    async fn on_feed(&mut self, feed: Feed) {
        let Some(converter) = self.feed_to_new.clone() else {
            return;
        };
        let Some(new) = converter(&feed) else {
            tracing::debug!(scheduler = %self.name, site = %feed.site, "no task derived from feed");
            return;
        };
        if let Err(err) = self.add_new_task(new).await {
            tracing::warn!(scheduler = %self.name, error = %err, "failed to add task from feed");
        }
    }

    async fn on_timer_fired(&mut self, id: i64) {
        self.timer_tasks.remove(&id);
        let Some(mut task) = self.waiting.remove(&id) else {
            return;
        };
        task.set_state(TaskState::InQueue);
        let task = self.persist(task).await;
        self.put_task_to_queue(task, TaskPriority::Default);
    }

    async fn finish_worker(&mut self, id: i64, result: Result<(), Arc<anyhow::Error>>) {
        self.ongoing_worker_tasks.remove(&id);
        if self.ongoing_workers.remove(&id).is_none() {
            // Cancelled or suspended before the completion arrived.
            return;
        }
        let Some(mut task) = self.ongoing.remove(&id) else {
            return;
        };
        match result {
            Ok(()) => {
                task.set_state(TaskState::Completed);
                let task = self.persist(task).await;
                self.completed.insert(id, task.clone());
                self.events.complete.emit(task);
            }
            Err(err) => {
                task.set_state(TaskState::Failed);
                let task = self.persist(task).await;
                tracing::warn!(
                    scheduler = %self.name,
                    id,
                    error = format!("{err:#}"),
                    "worker failed"
                );
                self.failed.insert(id, task.clone());
                self.events.processing.emit_error(err, task);
            }
        }
    }

    fn on_set_concurrent(&self, max_concurrent: usize) {
        let gate = self.gate.clone();
        let cmd_tx = self.cmd_tx.clone();
        let name = self.name.clone();
        // The resize drains the gate first; run it off the loop so command
        // handling stays live while it waits.
        tokio::spawn(async move {
            match gate.set_capacity(max_concurrent).await {
                Ok(()) => {
                    let _ = cmd_tx.send(Command::Kick);
                }
                Err(err) => {
                    tracing::warn!(scheduler = %name, error = %err, "rejected concurrency change");
                }
            }
        });
    }

    /// Start queued tasks while live entries and gate slots remain.
    async fn dispatch_ready(&mut self) {
        loop {
            let entry = loop {
                let Some(top) = self.task_queue.peek().copied() else {
                    break None;
                };
                if self.queue.contains_key(&top.id) {
                    break Some(top);
                }
                // Tombstone: the task left the queue some other way.
                self.task_queue.pop();
            };
            let Some(entry) = entry else { return };
            let Some(permit) = self.gate.try_acquire().await else {
                return;
            };
            self.task_queue.pop();
            let Some(task) = self.queue.remove(&entry.id) else {
                continue;
            };
            self.start_task(task, permit).await;
        }
    }

    async fn shutdown(&mut self) {
        for (_, timer) in self.timer_tasks.drain() {
            timer.abort();
        }
        let workers: Vec<_> = self.ongoing_workers.drain().collect();
        for (id, worker) in workers {
            worker.cancel().await;
            if let Some(handle) = self.ongoing_worker_tasks.remove(&id) {
                handle.abort();
            }
        }
        self.ongoing.clear();
        tracing::info!(scheduler = %self.name, "scheduler stopped");
    }
}

/// One scheduler instance. Construct, load, then hand `run()` to a task.
pub struct Scheduler<T: TaskRecord> {
    core: SchedulerCore<T>,
    cmd_rx: mpsc::UnboundedReceiver<Command<T>>,
}

impl<T: TaskRecord> Scheduler<T> {
    /// Build a scheduler and bind its inbound events.
    pub fn new(config: SchedulerConfig<T>) -> Result<Self, GateError> {
        let SchedulerConfig {
            name,
            repo,
            factory,
            events,
            max_concurrent,
            retry_delay_mins,
            auto_retry,
            feed_to_new,
        } = config;
        let gate = Arc::new(ConcurrencyGate::new(max_concurrent)?);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        bind_events(&events, &cmd_tx);
        if auto_retry {
            let retry = events.retry.clone();
            events.processing.bind_error(move |_err, task| {
                let retry = retry.clone();
                async move {
                    retry.emit(task);
                    Ok(())
                }
            });
        }

        Ok(Self {
            core: SchedulerCore {
                name,
                repo,
                factory,
                gate,
                events,
                cmd_tx,
                retry_delay_secs: retry_delay_mins * 60.0,
                feed_to_new,
                seq: 0,
                task_queue: BinaryHeap::new(),
                queue: HashMap::new(),
                waiting: HashMap::new(),
                ongoing: HashMap::new(),
                completed: HashMap::new(),
                failed: HashMap::new(),
                timer_tasks: HashMap::new(),
                ongoing_workers: HashMap::new(),
                ongoing_worker_tasks: HashMap::new(),
                suspend_workers: HashMap::new(),
            },
            cmd_rx,
        })
    }

    /// Handle for driving this scheduler.
    pub fn handle(&self) -> SchedulerHandle<T> {
        SchedulerHandle {
            cmd_tx: self.core.cmd_tx.clone(),
        }
    }

    /// Rebuild in-memory state from the repository. Call once before `run`.
    pub async fn load_tasks(&mut self) -> Result<(), SchedulerError> {
        let tasks = self.core.repo.get_multiple(None).await?;
        let count = tasks.len();
        for task in tasks {
            machine::load(&mut self.core, task).await;
        }
        tracing::info!(scheduler = %self.core.name, count, "loaded persisted tasks");
        Ok(())
    }

    /// The dispatcher loop. Runs until `shutdown` or every handle is gone.
    pub async fn run(mut self) {
        loop {
            self.core.dispatch_ready().await;
            match self.cmd_rx.recv().await {
                Some(Command::Shutdown) | None => break,
                Some(cmd) => self.handle_command(cmd).await,
            }
        }
        self.core.shutdown().await;
    }

    async fn handle_command(&mut self, cmd: Command<T>) {
        match cmd {
            Command::Add { new, reply } => {
                let result = self.core.add_new_task(new).await;
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(err) = result {
                            tracing::warn!(scheduler = %self.core.name, error = %err, "failed to add task");
                        }
                    }
                }
            }
            Command::Edit { edit, reply } => {
                let result = self.core.edit_task(edit).await;
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(err) = result {
                            tracing::warn!(scheduler = %self.core.name, error = %err, "failed to edit task");
                        }
                    }
                }
            }
            Command::Signal { signal, task } => machine::signal(&mut self.core, task, signal).await,
            Command::Feed(feed) => self.core.on_feed(feed).await,
            Command::TimerFired { id } => self.core.on_timer_fired(id).await,
            Command::WorkerFinished { id, result } => self.core.finish_worker(id, result).await,
            Command::SetConcurrent(max_concurrent) => self.core.on_set_concurrent(max_concurrent),
            Command::SetRetryDelay(minutes) => {
                self.core.retry_delay_secs = minutes * 60.0;
            }
            Command::Kick | Command::Shutdown => {}
        }
    }

    /// Process everything already in the command channel, then dispatch.
    #[cfg(test)]
    pub(crate) async fn drain(&mut self) {
        self.core.dispatch_ready().await;
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            self.handle_command(cmd).await;
            self.core.dispatch_ready().await;
        }
    }
}

fn bind_events<T: TaskRecord>(
    events: &SchedulerEvents<T>,
    cmd_tx: &mpsc::UnboundedSender<Command<T>>,
) {
    {
        let tx = cmd_tx.clone();
        events.new_task.bind(move |new| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(Command::Add { new, reply: None });
                Ok(())
            }
        });
    }
    {
        let tx = cmd_tx.clone();
        events.edit_task.bind(move |edit| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(Command::Edit { edit, reply: None });
                Ok(())
            }
        });
    }
    for (event, signal) in [
        (&events.pause, TaskSignal::Pause),
        (&events.resume, TaskSignal::Resume),
        (&events.cancel, TaskSignal::Cancel),
        (&events.force_start, TaskSignal::ForceStart),
        (&events.suspend, TaskSignal::Suspend),
        (&events.retry, TaskSignal::Retry),
    ] {
        let tx = cmd_tx.clone();
        event.bind(move |task| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(Command::Signal { signal, task });
                Ok(())
            }
        });
    }
    if let Some(feed) = &events.feed {
        let tx = cmd_tx.clone();
        feed.bind(move |feed| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(Command::Feed(feed));
                Ok(())
            }
        });
    }
}
