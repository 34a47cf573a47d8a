//! Route layer: thin handlers over the scheduler handles, the subscriber,
//! and the repositories, all speaking the `{success, message?, payload}`
//! envelope.

mod download;
mod subscription;
mod upload;

use axum::Json;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use repost_core::task::TaskState;
use repost_engine::repo::StoreError;
use repost_engine::scheduler::SchedulerError;
use repost_engine::subscriber::SubscribeError;

use crate::auth;
use crate::state::AppState;

/// Assemble the full application router.
pub fn app(state: AppState) -> axum::Router {
    axum::Router::new()
        .nest("/download", download::router())
        .nest("/upload", upload::router())
        .nest("/subscription", subscription::router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ))
        .with_state(state)
}

/// Single-payload response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn payload(payload: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: None,
            payload: Some(payload),
        })
    }

    pub fn status(success: bool, message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success,
            message: Some(message.into()),
            payload: None,
        })
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            payload: None,
        }
    }
}

/// List response envelope.
#[derive(Debug, Serialize)]
pub struct ApiListResponse<T> {
    pub success: bool,
    pub payloads: Vec<T>,
}

impl<T: Serialize> ApiListResponse<T> {
    pub fn payloads(payloads: Vec<T>) -> Json<Self> {
        Json(Self {
            success: true,
            payloads,
        })
    }
}

/// Route-level errors mapped onto HTTP statuses.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("record {0} not found")]
    NotFound(i64),
    #[error("task {id} cannot be edited while {state:?}")]
    EditRejected { id: i64, state: TaskState },
    #[error("{0}")]
    BadRequest(String),
    #[error("hub rejected the request: {0}")]
    BadGateway(String),
    #[error("{0} is disabled")]
    Disabled(&'static str),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::EditRejected { .. } => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Disabled(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = format!("{self:#}"), "request failed");
        }
        (status, Json(ApiResponse::<()>::failure(self.to_string()))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ApiError::NotFound(id),
            StoreError::Backend(err) => ApiError::Internal(err),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::EditRejected { id, state } => ApiError::EditRejected { id, state },
            SchedulerError::Store(err) => err.into(),
            SchedulerError::Stopped => ApiError::Internal(anyhow::anyhow!("scheduler stopped")),
        }
    }
}

impl From<SubscribeError> for ApiError {
    fn from(err: SubscribeError) -> Self {
        match err {
            SubscribeError::SignatureInvalid => {
                ApiError::BadRequest("signature missing or invalid".into())
            }
            SubscribeError::UnknownSite(site) => {
                ApiError::BadRequest(format!("no subscriber registered for site {site:?}"))
            }
            SubscribeError::HubRejected { name, detail } => {
                ApiError::BadGateway(format!("{name}: {detail}"))
            }
            SubscribeError::Store(err) => err.into(),
            SubscribeError::Timeout(id) => {
                ApiError::Internal(anyhow::anyhow!("subscription {id} was not validated in time"))
            }
            SubscribeError::Other(err) => ApiError::Internal(err),
        }
    }
}
