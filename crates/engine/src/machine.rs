//! Per-task transition logic.
//!
//! The scheduler dispatches every external signal and the startup recovery
//! pass through these functions. Each arm matches one `(state, event)` cell;
//! any pair without an arm is deliberately a no-op so that events arriving
//! out of order under races degrade gracefully.

use chrono::Utc;
use repost_core::task::{TaskPriority, TaskRecord, TaskState};

use crate::scheduler::{SchedulerCore, TaskSignal};

/// Recovery transition, invoked once per task at startup to rebuild the
/// in-memory state from the persisted one.
pub(crate) async fn load<T: TaskRecord>(core: &mut SchedulerCore<T>, task: T) {
    match task.state() {
        TaskState::Waiting => {
            let now = Utc::now().timestamp();
            if task.wait_time() <= now {
                let mut task = task;
                task.set_state(TaskState::InQueue);
                let task = core.persist(task).await;
                core.put_task_to_queue(task, TaskPriority::Default);
            } else {
                let delay = (task.wait_time() - now) as f64;
                core.put_task_to_wait(task, delay).await;
            }
        }
        TaskState::InQueue => {
            let priority = task.priority();
            core.put_task_to_queue(task, priority);
        }
        TaskState::Processing => {
            let permit = core.gate.acquire().await;
            core.start_task(task, permit).await;
        }
        TaskState::Pause => {
            let id = task.id();
            let permit = core.gate.acquire().await;
            core.start_task(task.clone(), permit).await;
            let mut task = task;
            task.set_state(TaskState::Pause);
            let task = core.persist(task).await;
            core.ongoing.insert(id, task);
            core.pause_worker(id).await;
        }
        TaskState::Suspended => {
            // Park a fresh worker; it is reclaimed when the task restarts.
            let worker = core.factory.build(&task);
            core.suspend_workers.insert(task.id(), worker);
        }
        TaskState::Completed => {
            core.completed.insert(task.id(), task);
        }
        TaskState::Failed => {
            core.failed.insert(task.id(), task);
        }
    }
}

/// Dispatch one external signal against the task's current state.
pub(crate) async fn signal<T: TaskRecord>(core: &mut SchedulerCore<T>, task: T, signal: TaskSignal) {
    let id = task.id();
    match (task.state(), signal) {
        (TaskState::Waiting, TaskSignal::Cancel) => {
            if core.skip_wait(id).is_some() {
                core.destroy_task(id).await;
            }
        }
        (TaskState::Waiting, TaskSignal::ForceStart) => {
            if let Some(mut task) = core.skip_wait(id) {
                task.set_state(TaskState::InQueue);
                let task = core.persist(task).await;
                core.put_task_to_queue(task, TaskPriority::InHurry);
            }
        }
        (TaskState::InQueue, TaskSignal::Cancel) => {
            if core.remove_task_from_queue(id).is_some() {
                core.destroy_task(id).await;
            }
        }
        (TaskState::InQueue, TaskSignal::ForceStart) => {
            // Re-enqueue ahead of the pack; the old heap entry tombstones.
            if let Some(task) = core.remove_task_from_queue(id) {
                core.put_task_to_queue(task, TaskPriority::InHurry);
            }
        }
        (TaskState::Processing, TaskSignal::Pause) => {
            let mut task = task;
            task.set_state(TaskState::Pause);
            let task = core.persist(task).await;
            core.ongoing.insert(id, task);
            core.pause_worker(id).await;
        }
        (TaskState::Processing, TaskSignal::Suspend) => {
            let mut task = task;
            task.set_state(TaskState::Suspended);
            core.persist(task).await;
            core.suspend_worker(id).await;
        }
        (TaskState::Processing, TaskSignal::Cancel) | (TaskState::Pause, TaskSignal::Cancel) => {
            core.cancel_worker(id).await;
            core.destroy_task(id).await;
        }
        (TaskState::Pause, TaskSignal::Resume) | (TaskState::Pause, TaskSignal::ForceStart) => {
            let mut task = task;
            task.set_state(TaskState::Processing);
            let task = core.persist(task).await;
            core.ongoing.insert(id, task);
            core.resume_worker(id).await;
        }
        (TaskState::Suspended, TaskSignal::Resume) => {
            let mut task = task;
            task.set_state(TaskState::InQueue);
            let task = core.persist(task).await;
            core.put_task_to_queue(task, TaskPriority::Default);
        }
        (TaskState::Suspended, TaskSignal::ForceStart) => {
            let mut task = task;
            task.set_state(TaskState::InQueue);
            let task = core.persist(task).await;
            core.put_task_to_queue(task, TaskPriority::InHurry);
        }
        (TaskState::Completed, TaskSignal::Retry) | (TaskState::Failed, TaskSignal::Retry) => {
            core.completed.remove(&id);
            core.failed.remove(&id);
            let delay = core.retry_delay_secs;
            core.put_task_to_wait(task, delay).await;
        }
        (state, signal) => {
            tracing::debug!(
                scheduler = %core.name,
                id,
                ?state,
                ?signal,
                "ignoring signal for task state"
            );
        }
    }
}
