use shared::{
    domain::{ActivityFilter, User, UserId},
    error::{ApiError, ErrorCode},
    protocol::{Page, UserListQuery, UserPayload},
};
use storage::{Storage, UserFilter, UserRecord};
use tracing::info;
use url::form_urlencoded;

mod password;
mod validation;

pub use password::{hash_password, verify_password};
pub use validation::{validate_user, ValidUser};
use validation::email_taken_error;

pub const DEFAULT_PER_PAGE: u64 = 30;
/// Initial password given to users created through the admin screens.
pub const DEFAULT_INITIAL_PASSWORD: &str = "password";

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub per_page: u64,
}

impl ApiContext {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

/// Lists one page of users for `query`.
///
/// `path` is the URL of the listing without a query string; the page links in
/// the result are built from it and carry the search and filter along.
pub async fn index_users(
    ctx: &ApiContext,
    query: &UserListQuery,
    path: &str,
) -> Result<Page<User>, ApiError> {
    let current_page = query.page.unwrap_or(1).max(1);
    let per_page = ctx.per_page.max(1);
    let filter = UserFilter {
        search: query.search.clone(),
        activity: ActivityFilter::parse(query.is_active.as_deref()),
    };

    let (data, total) = ctx
        .storage
        .list_users(&filter, current_page, per_page)
        .await
        .map_err(internal)?;

    let last_page = total.div_ceil(per_page).max(1);
    let from = (!data.is_empty()).then(|| (current_page - 1) * per_page + 1);
    let to = from.map(|from| from + data.len() as u64 - 1);
    let next_page_url =
        (current_page < last_page).then(|| page_url(path, query, current_page + 1));
    let prev_page_url = (current_page > 1).then(|| page_url(path, query, current_page - 1));

    Ok(Page {
        data,
        total,
        current_page,
        next_page_url,
        prev_page_url,
        per_page,
        last_page,
        from,
        to,
        path: path.to_string(),
    })
}

pub async fn store_user(ctx: &ApiContext, payload: &UserPayload) -> Result<User, ApiError> {
    let valid = validate_user(&ctx.storage, payload, None).await?;
    let password_hash = hash_password(DEFAULT_INITIAL_PASSWORD).map_err(internal)?;
    let user = ctx
        .storage
        .create_user(valid.as_record(), &password_hash)
        .await
        .map_err(write_failure)?;
    info!(user_id = %user.id, email = %user.email, "user created");
    Ok(user)
}

pub async fn update_user(
    ctx: &ApiContext,
    user_id: UserId,
    payload: &UserPayload,
) -> Result<User, ApiError> {
    ensure_user_exists(ctx, user_id).await?;
    let valid = validate_user(&ctx.storage, payload, Some(user_id)).await?;
    let user = ctx
        .storage
        .update_user(user_id, valid.as_record())
        .await
        .map_err(write_failure)?
        .ok_or_else(user_not_found)?;
    info!(user_id = %user.id, "user updated");
    Ok(user)
}

pub async fn destroy_user(ctx: &ApiContext, user_id: UserId) -> Result<(), ApiError> {
    let removed = ctx.storage.delete_user(user_id).await.map_err(internal)?;
    if !removed {
        return Err(user_not_found());
    }
    info!(user_id = %user_id, "user deleted");
    Ok(())
}

async fn ensure_user_exists(ctx: &ApiContext, user_id: UserId) -> Result<(), ApiError> {
    ctx.storage
        .get_user(user_id)
        .await
        .map_err(internal)?
        .map(|_| ())
        .ok_or_else(user_not_found)
}

fn page_url(path: &str, query: &UserListQuery, page: u64) -> String {
    let mut pairs = form_urlencoded::Serializer::new(String::new());
    if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty()) {
        pairs.append_pair("search", search);
    }
    if let Some(is_active) = query.is_active.as_deref().filter(|s| !s.is_empty()) {
        pairs.append_pair("is_active", is_active);
    }
    pairs.append_pair("page", &page.to_string());
    format!("{path}?{}", pairs.finish())
}

fn user_not_found() -> ApiError {
    ApiError::new(ErrorCode::NotFound, "user not found")
}

/// A write that lost a race for an email reads like the validation failure
/// it would have been a moment later.
fn write_failure(err: anyhow::Error) -> ApiError {
    if storage::is_unique_violation(&err) {
        return ApiError::validation(email_taken_error());
    }
    internal(err)
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

impl ValidUser {
    fn as_record(&self) -> UserRecord<'_> {
        UserRecord {
            name: &self.name,
            email: &self.email,
            is_active: self.is_active,
        }
    }
}
