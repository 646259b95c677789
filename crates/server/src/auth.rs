use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use constant_time_eq::constant_time_eq;
use shared::error::{ApiError, ErrorCode};
use tracing::warn;

use crate::app_state::AppState;

/// Gate for the protected route group: `Authorization: Bearer <admin_token>`.
pub(crate) async fn require_admin_token(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .is_some_and(|token| {
            !token.is_empty() && constant_time_eq(token.as_bytes(), state.site.admin_token.as_bytes())
        });

    if authorized {
        return next.run(request).await;
    }

    warn!(path = %request.uri().path(), "rejected request without a valid admin token");
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiError::new(ErrorCode::Unauthorized, "unauthenticated")),
    )
        .into_response()
}
