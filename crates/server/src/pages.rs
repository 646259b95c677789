use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use shared::{
    error::{ApiError, ErrorCode},
    protocol::PageView,
};
use tracing::info;

use crate::app_state::{AppState, SiteConfig};

pub(crate) const LOCALE_COOKIE: &str = "locale";
const LOCALE_COOKIE_MAX_AGE_SECS: u64 = 60 * 60 * 24 * 365;
const MAX_LOCALE_LEN: usize = 16;

pub(crate) async fn home(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Json<PageView> {
    Json(render(
        &state.site,
        &headers,
        "Welcome",
        json!({ "can_register": state.site.registration_enabled }),
        "/",
    ))
}

pub(crate) async fn dashboard(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<PageView> {
    Json(render(&state.site, &headers, "Dashboard", json!({}), "/dashboard"))
}

/// Stores the chosen locale in a cookie and sends the client back where it came from.
pub(crate) async fn switch_locale(Path(locale): Path<String>, headers: HeaderMap) -> Response {
    if !is_valid_locale(&locale) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(ErrorCode::BadRequest, "invalid locale")),
        )
            .into_response();
    }

    let cookie = format!(
        "{LOCALE_COOKIE}={locale}; Path=/; Max-Age={LOCALE_COOKIE_MAX_AGE_SECS}; SameSite=Lax"
    );
    let back = headers
        .get(header::REFERER)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("/"));

    info!(%locale, "locale switched");
    let mut response = StatusCode::FOUND.into_response();
    response.headers_mut().insert(header::LOCATION, back);
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    }
    response
}

pub(crate) fn render(
    site: &SiteConfig,
    headers: &HeaderMap,
    component: &str,
    mut props: serde_json::Value,
    url: &str,
) -> PageView {
    if let Some(props) = props.as_object_mut() {
        props.insert("app_name".into(), json!(site.app_name));
        props.insert("locale".into(), json!(request_locale(site, headers)));
    }
    PageView::new(component, props, url)
}

/// The locale chosen through `/lang/:locale`, or the configured default.
pub(crate) fn request_locale(site: &SiteConfig, headers: &HeaderMap) -> String {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == LOCALE_COOKIE && is_valid_locale(value))
        .map(|(_, value)| value.to_string())
        .unwrap_or_else(|| site.default_locale.clone())
}

fn is_valid_locale(locale: &str) -> bool {
    !locale.is_empty()
        && locale.len() <= MAX_LOCALE_LEN
        && locale
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
