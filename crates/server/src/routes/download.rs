use axum::Json;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use chrono::Utc;

use repost_core::task::{DownloadTask, EditDownloadTask, NewDownloadTask, TaskFilter};
use repost_engine::scheduler::SchedulerHandle;

use super::{ApiError, ApiListResponse, ApiResponse};
use crate::state::AppState;

pub(super) fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/", get(list).post(add))
        .route("/sync/", post(add_sync))
        .route("/get_all", post(list_filtered))
        .route("/{id}", get(get_one).post(edit).put(pause).delete(cancel))
        .route("/{id}/force", get(force))
        .route("/{id}/retry", post(retry))
}

fn scheduler(state: &AppState) -> Result<&SchedulerHandle<DownloadTask>, ApiError> {
    state
        .download
        .as_ref()
        .ok_or(ApiError::Disabled("download scheduler"))
}

/// Fill in the configured auto-wait when the caller left `wait_time` unset.
fn apply_wait_default(state: &AppState, mut new: NewDownloadTask) -> NewDownloadTask {
    if new.wait_time.is_none() {
        if let Some(delay) = state.auto_download_wait_time {
            new.wait_time = Some(Utc::now().timestamp() + delay);
        }
    }
    new
}

async fn list(
    State(state): State<AppState>,
) -> Result<Json<ApiListResponse<DownloadTask>>, ApiError> {
    let tasks = state.download_repo.get_multiple(None).await?;
    Ok(ApiListResponse::payloads(tasks))
}

async fn list_filtered(
    State(state): State<AppState>,
    Json(filter): Json<TaskFilter>,
) -> Result<Json<ApiListResponse<DownloadTask>>, ApiError> {
    let tasks = state.download_repo.get_multiple(Some(&filter)).await?;
    Ok(ApiListResponse::payloads(tasks))
}

async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<DownloadTask>>, ApiError> {
    let task = state.download_repo.get(id).await?;
    Ok(ApiResponse::payload(task))
}

async fn add(
    State(state): State<AppState>,
    Json(new): Json<NewDownloadTask>,
) -> Json<ApiResponse<()>> {
    let new = apply_wait_default(&state, new);
    let emitted = state.channels.download.new_task.emit(new);
    ApiResponse::status(
        emitted,
        if emitted {
            "download task scheduled"
        } else {
            "no scheduler is consuming new download tasks"
        },
    )
}

async fn add_sync(
    State(state): State<AppState>,
    Json(new): Json<NewDownloadTask>,
) -> Result<Json<ApiResponse<DownloadTask>>, ApiError> {
    let new = apply_wait_default(&state, new);
    let task = scheduler(&state)?.add_new_task_sync(new).await?;
    Ok(ApiResponse::payload(task))
}

async fn edit(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(mut edit): Json<EditDownloadTask>,
) -> Result<Json<ApiResponse<DownloadTask>>, ApiError> {
    edit.id = id;
    let task = scheduler(&state)?.edit_task_sync(edit).await?;
    Ok(ApiResponse::payload(task))
}

async fn pause(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let task = state.download_repo.get(id).await?;
    let emitted = state.channels.download.pause.emit(task);
    Ok(ApiResponse::status(emitted, "pause requested"))
}

async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let task = state.download_repo.get(id).await?;
    let emitted = state.channels.download.cancel.emit(task);
    Ok(ApiResponse::status(emitted, "cancel requested"))
}

async fn force(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let task = state.download_repo.get(id).await?;
    let emitted = state.channels.download.force_start.emit(task);
    Ok(ApiResponse::status(emitted, "force start requested"))
}

/// Operator-initiated retry; also the way to re-download a completed task.
async fn retry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let task = state.download_repo.get(id).await?;
    let emitted = state.channels.download.retry.emit(task);
    Ok(ApiResponse::status(emitted, "retry requested"))
}
