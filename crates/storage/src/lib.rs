use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, QueryBuilder, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

use shared::domain::{ActivityFilter, User, UserId};

const USER_COLUMNS: &str = "id, name, email, is_active, created_at, updated_at";

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

/// Column values for an insert or an update of a user row.
#[derive(Debug, Clone)]
pub struct UserRecord<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub search: Option<String>,
    pub activity: ActivityFilter,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to `sqlite::memory:` opens its own empty database.
        let pool_options = if is_memory_url(database_url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(connect_options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_user(&self, record: UserRecord<'_>, password_hash: &str) -> Result<User> {
        let now = Utc::now();
        let row = sqlx::query(&format!(
            "INSERT INTO users (name, email, is_active, password_hash, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(record.name)
        .bind(record.email)
        .bind(record.is_active)
        .bind(password_hash)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to insert user '{}'", record.email))?;
        Ok(user_from_row(&row))
    }

    /// Returns `None` when no user has the given id.
    pub async fn update_user(&self, user_id: UserId, record: UserRecord<'_>) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "UPDATE users SET name = ?, email = ?, is_active = ?, updated_at = ?
             WHERE id = ?
             RETURNING {USER_COLUMNS}"
        ))
        .bind(record.name)
        .bind(record.email)
        .bind(record.is_active)
        .bind(Utc::now())
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to update user {user_id}"))?;
        Ok(row.as_ref().map(user_from_row))
    }

    /// Returns whether a row was removed.
    pub async fn delete_user(&self, user_id: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id.0)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to delete user {user_id}"))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_user(&self, user_id: UserId) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    pub async fn password_hash_for_user(&self, user_id: UserId) -> Result<Option<String>> {
        let row = sqlx::query("SELECT password_hash FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    /// Whether another user already uses `email`, ignoring `except` when given.
    pub async fn email_taken(&self, email: &str, except: Option<UserId>) -> Result<bool> {
        let count: i64 = match except {
            Some(user_id) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ? AND id != ?")
                    .bind(email)
                    .bind(user_id.0)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ?")
                    .bind(email)
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count > 0)
    }

    /// Lists one page of users, newest first, with the total count of matches.
    ///
    /// `page` is 1-based. `search` matches a case-insensitive substring of the
    /// name or the email.
    pub async fn list_users(
        &self,
        filter: &UserFilter,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<User>, u64)> {
        let page = page.max(1);
        let per_page = per_page.max(1);

        let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM users");
        push_user_filter(&mut count_query, filter);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .context("failed to count users")?;

        let mut list_query = QueryBuilder::<Sqlite>::new(format!("SELECT {USER_COLUMNS} FROM users"));
        push_user_filter(&mut list_query, filter);
        // Pages past any row, however far, just come back empty.
        let offset = (page - 1)
            .checked_mul(per_page)
            .and_then(|offset| i64::try_from(offset).ok())
            .unwrap_or(i64::MAX);
        list_query.push(" ORDER BY id DESC LIMIT ");
        list_query.push_bind(i64::try_from(per_page).unwrap_or(i64::MAX));
        list_query.push(" OFFSET ");
        list_query.push_bind(offset);
        let rows = list_query
            .build()
            .fetch_all(&self.pool)
            .await
            .context("failed to list users")?;

        debug!(
            page,
            per_page,
            total,
            returned = rows.len(),
            "listed users"
        );
        Ok((rows.iter().map(user_from_row).collect(), total.max(0) as u64))
    }
}

/// Whether `err` came from a write rejected by a unique index, such as a
/// second user with an email inserted between the check and the write.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<sqlx::Error>(),
            Some(sqlx::Error::Database(db)) if db.is_unique_violation()
        )
    })
}

fn push_user_filter(query: &mut QueryBuilder<'_, Sqlite>, filter: &UserFilter) {
    let mut has_where = false;

    if let Some(search) = filter
        .search
        .as_deref()
        .map(str::trim)
        .filter(|search| !search.is_empty())
    {
        let needle = search.to_lowercase();
        push_clause(query, &mut has_where);
        query.push("(instr(lower(name), ");
        query.push_bind(needle.clone());
        query.push(") > 0 OR instr(lower(email), ");
        query.push_bind(needle);
        query.push(") > 0)");
    }

    if let Some(is_active) = filter.activity.wanted_state() {
        push_clause(query, &mut has_where);
        query.push("is_active = ");
        query.push_bind(is_active);
    }
}

fn push_clause(query: &mut QueryBuilder<'_, Sqlite>, has_where: &mut bool) {
    query.push(if *has_where { " AND " } else { " WHERE " });
    *has_where = true;
}

fn user_from_row(row: &SqliteRow) -> User {
    User {
        id: UserId(row.get::<i64, _>("id")),
        name: row.get::<String, _>("name"),
        email: row.get::<String, _>("email"),
        is_active: row.get::<bool, _>("is_active"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    }
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.starts_with("sqlite::memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_memory_url(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
