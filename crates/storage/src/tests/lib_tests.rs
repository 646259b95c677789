use super::*;

async fn seeded(count: usize) -> Storage {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    for i in 0..count {
        let name = format!("user {i}");
        let email = format!("user{i}@example.com");
        storage
            .create_user(
                UserRecord {
                    name: &name,
                    email: &email,
                    is_active: i % 2 == 0,
                },
                "hash",
            )
            .await
            .expect("user");
    }
    storage
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("storage.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[tokio::test]
async fn creates_and_reads_back_user() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let created = storage
        .create_user(
            UserRecord {
                name: "Ada",
                email: "ada@example.com",
                is_active: true,
            },
            "argon-hash",
        )
        .await
        .expect("create");

    let loaded = storage
        .get_user(created.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(loaded, created);
    assert_eq!(
        storage
            .password_hash_for_user(created.id)
            .await
            .expect("hash")
            .as_deref(),
        Some("argon-hash")
    );
}

#[tokio::test]
async fn duplicate_email_is_rejected_by_the_index() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let record = UserRecord {
        name: "Ada",
        email: "ada@example.com",
        is_active: true,
    };
    storage.create_user(record.clone(), "h").await.expect("first");
    let err = storage
        .create_user(record, "h")
        .await
        .expect_err("duplicate email must fail");
    assert!(is_unique_violation(&err), "{err:#}");
}

#[tokio::test]
async fn update_onto_taken_email_is_a_unique_violation() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .create_user(record_for("ada@example.com"), "h")
        .await
        .expect("ada");
    let grace = storage
        .create_user(record_for("grace@example.com"), "h")
        .await
        .expect("grace");

    let err = storage
        .update_user(grace.id, record_for("ada@example.com"))
        .await
        .expect_err("taken email");
    assert!(is_unique_violation(&err), "{err:#}");
    assert!(!is_unique_violation(&anyhow::anyhow!("unrelated failure")));
}

fn record_for(email: &str) -> UserRecord<'_> {
    UserRecord {
        name: "Someone",
        email,
        is_active: true,
    }
}

#[tokio::test]
async fn update_and_delete_report_missing_rows() {
    let storage = seeded(1).await;
    let missing = UserId(999);
    let updated = storage
        .update_user(
            missing,
            UserRecord {
                name: "x",
                email: "x@example.com",
                is_active: false,
            },
        )
        .await
        .expect("update");
    assert!(updated.is_none());
    assert!(!storage.delete_user(missing).await.expect("delete"));
}

#[tokio::test]
async fn update_changes_fields_and_keeps_created_at() {
    let storage = seeded(1).await;
    let (users, _) = storage
        .list_users(&UserFilter::default(), 1, 30)
        .await
        .expect("list");
    let original = users[0].clone();

    let updated = storage
        .update_user(
            original.id,
            UserRecord {
                name: "renamed",
                email: "renamed@example.com",
                is_active: false,
            },
        )
        .await
        .expect("update")
        .expect("exists");

    assert_eq!(updated.id, original.id);
    assert_eq!(updated.name, "renamed");
    assert!(!updated.is_active);
    assert_eq!(updated.created_at, original.created_at);
    assert!(updated.updated_at >= original.updated_at);
}

#[tokio::test]
async fn email_taken_ignores_the_excepted_user() {
    let storage = seeded(2).await;
    let (users, _) = storage
        .list_users(&UserFilter::default(), 1, 30)
        .await
        .expect("list");
    let owner = users
        .iter()
        .find(|u| u.email == "user0@example.com")
        .expect("owner");

    assert!(storage
        .email_taken("user0@example.com", None)
        .await
        .expect("taken"));
    assert!(!storage
        .email_taken("user0@example.com", Some(owner.id))
        .await
        .expect("taken"));
    assert!(!storage
        .email_taken("nobody@example.com", None)
        .await
        .expect("taken"));
}

#[tokio::test]
async fn lists_newest_first_with_pagination() {
    let storage = seeded(35).await;

    let (first, total) = storage
        .list_users(&UserFilter::default(), 1, 30)
        .await
        .expect("page 1");
    assert_eq!(total, 35);
    assert_eq!(first.len(), 30);
    assert!(first.windows(2).all(|w| w[0].id.0 > w[1].id.0));

    let (second, total) = storage
        .list_users(&UserFilter::default(), 2, 30)
        .await
        .expect("page 2");
    assert_eq!(total, 35);
    assert_eq!(second.len(), 5);
    assert!(second[0].id.0 < first[29].id.0);

    let (empty, _) = storage
        .list_users(&UserFilter::default(), 3, 30)
        .await
        .expect("page 3");
    assert!(empty.is_empty());

    for page in [u64::MAX / 2, u64::MAX] {
        let (beyond, total) = storage
            .list_users(&UserFilter::default(), page, 30)
            .await
            .expect("far page");
        assert_eq!(total, 35);
        assert!(beyond.is_empty(), "page {page}");
    }
}

#[tokio::test]
async fn search_matches_name_or_email_case_insensitively() {
    let storage = seeded(3).await;
    storage
        .create_user(
            UserRecord {
                name: "Grace Hopper",
                email: "grace@navy.example",
                is_active: true,
            },
            "h",
        )
        .await
        .expect("grace");

    let by_name = UserFilter {
        search: Some("HOPPER".into()),
        ..UserFilter::default()
    };
    let (users, total) = storage.list_users(&by_name, 1, 30).await.expect("list");
    assert_eq!(total, 1);
    assert_eq!(users[0].name, "Grace Hopper");

    let by_email = UserFilter {
        search: Some("navy".into()),
        ..UserFilter::default()
    };
    let (_, total) = storage.list_users(&by_email, 1, 30).await.expect("list");
    assert_eq!(total, 1);

    let literal_percent = UserFilter {
        search: Some("%".into()),
        ..UserFilter::default()
    };
    let (_, total) = storage
        .list_users(&literal_percent, 1, 30)
        .await
        .expect("list");
    assert_eq!(total, 0);
}

#[tokio::test]
async fn activity_filter_combines_with_search() {
    let storage = seeded(6).await;

    let active = UserFilter {
        activity: ActivityFilter::Active,
        ..UserFilter::default()
    };
    let (users, total) = storage.list_users(&active, 1, 30).await.expect("list");
    assert_eq!(total, 3);
    assert!(users.iter().all(|u| u.is_active));

    let inactive_user_1 = UserFilter {
        search: Some("user1@".into()),
        activity: ActivityFilter::Inactive,
    };
    let (users, total) = storage
        .list_users(&inactive_user_1, 1, 30)
        .await
        .expect("list");
    assert_eq!(total, 1);
    assert_eq!(users[0].email, "user1@example.com");
}
