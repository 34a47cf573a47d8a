use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::routes::ApiResponse;
use crate::state::AppState;

/// Single-header token check applied to every route except the hub
/// callbacks, which the hub calls without knowing the app token.
pub async fn require_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.app_token.as_deref() else {
        return next.run(request).await;
    };
    if request.uri().path().starts_with("/subscription/callback/") {
        return next.run(request).await;
    }
    let provided = request
        .headers()
        .get("token")
        .and_then(|value| value.to_str().ok());
    if provided == Some(expected) {
        next.run(request).await
    } else {
        (
            StatusCode::FORBIDDEN,
            Json(ApiResponse::<()>::failure("invalid or missing token")),
        )
            .into_response()
    }
}
