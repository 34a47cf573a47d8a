use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use serde::Deserialize;

use repost_core::subscription::{
    EditHub, Hub, NewHub, NewSubscription, Subscription, Validation, ValidationResponse,
};

use super::{ApiError, ApiListResponse, ApiResponse};
use crate::state::AppState;

pub(super) fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/", post(subscribe).delete(unsubscribe))
        .route("/sync", post(subscribe_sync))
        .route("/callback/{site}/{id}", get(validation).post(receive_update))
        .route("/hub", get(all_hubs).post(add_hub))
        .route("/hub/{id}", get(get_hub).put(edit_hub).delete(delete_hub))
}

fn subscriber(
    state: &AppState,
) -> Result<&std::sync::Arc<repost_engine::subscriber::Subscriber>, ApiError> {
    state
        .subscriber
        .as_ref()
        .ok_or(ApiError::Disabled("subscription handling"))
}

async fn subscribe(
    State(state): State<AppState>,
    Json(new): Json<NewSubscription>,
) -> Json<ApiResponse<()>> {
    let emitted = state.channels.subscribe.emit(new);
    ApiResponse::status(
        emitted,
        if emitted {
            "subscribe requested"
        } else {
            "failed to emit a subscribe event"
        },
    )
}

async fn subscribe_sync(
    State(state): State<AppState>,
    Json(new): Json<NewSubscription>,
) -> Result<Json<ApiResponse<Subscription>>, ApiError> {
    let subscription = subscriber(&state)?.subscribe(new).await?;
    Ok(ApiResponse::payload(subscription))
}

#[derive(Debug, Deserialize)]
struct UnsubscribeParams {
    id: i64,
}

async fn unsubscribe(
    State(state): State<AppState>,
    Query(params): Query<UnsubscribeParams>,
) -> Json<ApiResponse<()>> {
    let emitted = state.channels.unsubscribe.emit(params.id);
    ApiResponse::status(
        emitted,
        if emitted {
            "unsubscribe requested"
        } else {
            "failed to emit an unsubscribe event"
        },
    )
}

async fn validation(
    State(state): State<AppState>,
    Path((_site, id)): Path<(String, i64)>,
    Query(validation): Query<Validation>,
) -> Result<Json<ValidationResponse>, ApiError> {
    let valid = subscriber(&state)?.validate(id, &validation).await;
    Ok(Json(ValidationResponse {
        challenge: if valid {
            validation.challenge
        } else {
            "Invalid".to_string()
        },
    }))
}

async fn receive_update(
    State(state): State<AppState>,
    Path((site, id)): Path<(String, i64)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let signature = headers
        .get("X-Hub-Signature")
        .and_then(|value| value.to_str().ok());
    subscriber(&state)?
        .receive_update(&site, id, &body, signature)
        .await?;
    Ok(ApiResponse::status(true, "update received successfully"))
}

async fn all_hubs(State(state): State<AppState>) -> Result<Json<ApiListResponse<Hub>>, ApiError> {
    let hubs = state.hubs.get_multiple().await?;
    Ok(ApiListResponse::payloads(hubs))
}

async fn get_hub(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Hub>>, ApiError> {
    let hub = state.hubs.get(id).await?;
    Ok(ApiResponse::payload(hub))
}

async fn add_hub(
    State(state): State<AppState>,
    Json(new): Json<NewHub>,
) -> Result<Json<ApiResponse<Hub>>, ApiError> {
    let hub = state.hubs.create(new).await?;
    Ok(ApiResponse::payload(hub))
}

async fn edit_hub(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(edit): Json<EditHub>,
) -> Result<Json<ApiResponse<Hub>>, ApiError> {
    let hub = state.hubs.merge(id, edit).await?;
    Ok(ApiResponse::payload(hub))
}

async fn delete_hub(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let deleted = state.hubs.delete(id).await?;
    if !deleted {
        return Err(ApiError::NotFound(id));
    }
    Ok(ApiResponse::status(true, "hub deleted successfully"))
}
