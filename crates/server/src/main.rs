use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use server_api::{destroy_user, index_users, store_user, update_user, ApiContext};
use shared::{
    domain::{User, UserId},
    error::{ApiError, ErrorCode},
    protocol::{UserListQuery, UserPayload},
};
use storage::Storage;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use url::Url;

mod app_state;
mod auth;
mod config;
mod pages;

use app_state::{AppState, SiteConfig};
use config::{load_settings, prepare_database_url};

const MAX_BODY_BYTES: usize = 64 * 1024;
const USERS_PATH: &str = "/users";

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = load_settings();
    if let Some(public_url) = settings.server_public_url.as_deref() {
        Url::parse(public_url)
            .with_context(|| format!("invalid server_public_url '{public_url}'"))?;
    }

    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let api = ApiContext {
        storage,
        per_page: settings.per_page,
    };
    let site = SiteConfig {
        app_name: settings.app_name,
        default_locale: settings.default_locale,
        registration_enabled: settings.registration_enabled,
        admin_token: settings.admin_token,
        public_url: settings.server_public_url,
    };
    let app = build_router(Arc::new(AppState { api, site }));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed to listen for shutdown signal");
    }
    info!("shutting down");
}

fn build_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/dashboard", get(pages::dashboard))
        .route(USERS_PATH, get(http_index_users).post(http_store_user))
        .route(
            "/users/:user_id",
            put(http_update_user)
                .patch(http_update_user)
                .delete(http_destroy_user),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_admin_token,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/", get(pages::home))
        .route("/lang/:locale", get(pages::switch_locale))
        .merge(protected)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    match state.api.storage.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(error) => {
            error!(%error, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    }
}

/// JSON page of users for API clients, the `Users/Index` page otherwise.
async fn http_index_users(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    query: Result<Query<UserListQuery>, QueryRejection>,
) -> ApiResult<Response> {
    if !wants_json(&headers) {
        let page = pages::render(
            &state.site,
            &headers,
            "Users/Index",
            serde_json::json!({}),
            USERS_PATH,
        );
        return Ok(Json(page).into_response());
    }

    let Query(query) =
        query.map_err(|rejection| rejected(rejection.status(), rejection.body_text()))?;
    let path = listing_url(&state.site, &headers);
    let page = index_users(&state.api, &query, &path)
        .await
        .map_err(api_error)?;
    Ok(Json(page).into_response())
}

async fn http_store_user(
    State(state): State<Arc<AppState>>,
    body: Result<Json<UserPayload>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let payload = user_payload(body)?;
    let user = store_user(&state.api, &payload).await.map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn http_update_user(
    State(state): State<Arc<AppState>>,
    user_id: Result<Path<i64>, PathRejection>,
    body: Result<Json<UserPayload>, JsonRejection>,
) -> ApiResult<Json<User>> {
    let user_id = path_user_id(user_id)?;
    let payload = user_payload(body)?;
    let user = update_user(&state.api, user_id, &payload)
        .await
        .map_err(api_error)?;
    Ok(Json(user))
}

async fn http_destroy_user(
    State(state): State<Arc<AppState>>,
    user_id: Result<Path<i64>, PathRejection>,
) -> ApiResult<StatusCode> {
    destroy_user(&state.api, path_user_id(user_id)?)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// A JSON body that is valid but not an object carries no fields, so it is
/// validated as an empty payload instead of being rejected outright.
fn user_payload(body: Result<Json<UserPayload>, JsonRejection>) -> ApiResult<UserPayload> {
    match body {
        Ok(Json(payload)) => Ok(payload),
        Err(JsonRejection::JsonDataError(error)) => {
            debug!(%error, "user body is not an object");
            Ok(UserPayload::default())
        }
        Err(rejection) => Err(rejected(rejection.status(), rejection.body_text())),
    }
}

/// Ids that are not numbers name no user.
fn path_user_id(user_id: Result<Path<i64>, PathRejection>) -> ApiResult<UserId> {
    match user_id {
        Ok(Path(user_id)) => Ok(UserId(user_id)),
        Err(rejection) => {
            debug!(error = %rejection.body_text(), "unreadable user id");
            Err(api_error(ApiError::new(ErrorCode::NotFound, "user not found")))
        }
    }
}

fn rejected(status: StatusCode, message: String) -> (StatusCode, Json<ApiError>) {
    debug!(%status, %message, "rejected unreadable request");
    (status, Json(ApiError::new(ErrorCode::BadRequest, message)))
}

fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains("application/json") || accept.contains("+json"))
}

/// Absolute URL of the listing when the public origin is known, else its path.
fn listing_url(site: &SiteConfig, headers: &HeaderMap) -> String {
    if let Some(public_url) = site.public_url.as_deref() {
        return format!("{}{USERS_PATH}", public_url.trim_end_matches('/'));
    }

    let Some(host) = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .filter(|host| !host.is_empty())
    else {
        return USERS_PATH.to_string();
    };
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("http");
    format!("{scheme}://{host}{USERS_PATH}")
}

fn api_error(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match err.code {
        ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCode::Internal => {
            error!(message = %err.message, "internal error while handling request");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(err))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
