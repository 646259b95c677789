use super::*;
use axum::{body, body::Body, http::Request};
use shared::protocol::{Page, PageView};
use tower::ServiceExt;

const TOKEN: &str = "test-token";

async fn test_app() -> (Router, Storage) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let state = AppState {
        api: ApiContext::new(storage.clone()),
        site: SiteConfig {
            app_name: "Admin".into(),
            default_locale: "en".into(),
            registration_enabled: true,
            admin_token: TOKEN.into(),
            public_url: None,
        },
    };
    (build_router(Arc::new(state)), storage)
}

fn authed(builder: axum::http::request::Builder) -> axum::http::request::Builder {
    builder.header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    authed(Request::builder().method(method).uri(uri))
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCEPT, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

async fn create(app: &Router, name: &str, email: &str) -> User {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/users",
            serde_json::json!({ "name": name, "email": email, "is_active": true }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);
    read_json(response).await
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let (app, _storage) = test_app().await;
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn home_is_public_and_describes_welcome_page() {
    let (app, _storage) = test_app().await;
    let response = app
        .oneshot(Request::get("/").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let page: PageView = read_json(response).await;
    assert_eq!(page.component, "Welcome");
    assert_eq!(page.props["can_register"], true);
    assert_eq!(page.props["locale"], "en");
    assert_eq!(page.props["app_name"], "Admin");
}

#[tokio::test]
async fn protected_routes_require_admin_token() {
    let (app, _storage) = test_app().await;

    for uri in ["/dashboard", "/users"] {
        let response = app
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
        let err: ApiError = read_json(response).await;
        assert_eq!(err.code, ErrorCode::Unauthorized);
    }

    let wrong = Request::get("/dashboard")
        .header(header::AUTHORIZATION, "Bearer nope")
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(wrong).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let ok = authed(Request::get("/dashboard"))
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(ok).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let page: PageView = read_json(response).await;
    assert_eq!(page.component, "Dashboard");
}

#[tokio::test]
async fn locale_switch_sets_cookie_and_redirects_back() {
    let (app, _storage) = test_app().await;
    let request = Request::get("/lang/ar")
        .header(header::REFERER, "/dashboard")
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/dashboard");
    let cookie = response.headers()[header::SET_COOKIE]
        .to_str()
        .expect("cookie");
    assert!(cookie.starts_with("locale=ar;"), "{cookie}");

    let home = Request::get("/")
        .header(header::COOKIE, "theme=dark; locale=ar")
        .body(Body::empty())
        .expect("request");
    let page: PageView = read_json(app.oneshot(home).await.expect("response")).await;
    assert_eq!(page.props["locale"], "ar");
}

#[tokio::test]
async fn locale_switch_without_referer_goes_home_and_rejects_garbage() {
    let (app, _storage) = test_app().await;
    let response = app
        .clone()
        .oneshot(Request::get("/lang/en").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.headers()[header::LOCATION], "/");

    let response = app
        .oneshot(
            Request::get("/lang/a%3Bb")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn users_index_negotiates_page_or_json() {
    let (app, _storage) = test_app().await;

    let html_like = authed(Request::get("/users"))
        .header(header::ACCEPT, "text/html")
        .body(Body::empty())
        .expect("request");
    let page: PageView = read_json(app.clone().oneshot(html_like).await.expect("response")).await;
    assert_eq!(page.component, "Users/Index");

    create(&app, "Ada", "ada@example.com").await;
    let json = authed(Request::get("/users"))
        .header(header::ACCEPT, "application/json")
        .header(header::HOST, "admin.test")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(json).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let page: Page<User> = read_json(response).await;
    assert_eq!(page.total, 1);
    assert_eq!(page.data[0].email, "ada@example.com");
    assert_eq!(page.path, "http://admin.test/users");
}

#[tokio::test]
async fn users_index_filters_and_links_next_page() {
    let (app, _storage) = test_app().await;
    for i in 0..31 {
        create(&app, &format!("Member {i}"), &format!("m{i}@example.com")).await;
    }
    create(&app, "Outsider", "out@elsewhere.test").await;

    let request = authed(Request::get("/users?search=example&is_active=active"))
        .header(header::ACCEPT, "application/json")
        .header(header::HOST, "admin.test")
        .body(Body::empty())
        .expect("request");
    let page: Page<User> = read_json(app.clone().oneshot(request).await.expect("response")).await;
    assert_eq!(page.total, 31);
    assert_eq!(page.data.len(), 30);
    assert_eq!(page.data[0].name, "Member 30");
    assert_eq!(
        page.next_page_url.as_deref(),
        Some("http://admin.test/users?search=example&is_active=active&page=2")
    );

    let request = authed(Request::get("/users?search=example&is_active=active&page=2"))
        .header(header::ACCEPT, "application/json")
        .body(Body::empty())
        .expect("request");
    let page: Page<User> = read_json(app.oneshot(request).await.expect("response")).await;
    assert_eq!(page.current_page, 2);
    assert_eq!(page.data.len(), 1);
    assert!(page.next_page_url.is_none());
}

#[tokio::test]
async fn store_validation_failure_returns_field_errors() {
    let (app, _storage) = test_app().await;
    create(&app, "Ada", "ada@example.com").await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/users",
            serde_json::json!({ "name": "", "email": "ada@example.com", "is_active": true }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body: serde_json::Value = read_json(response).await;
    assert_eq!(body["errors"]["name"][0], "The name field is required.");
    assert_eq!(
        body["errors"]["email"][0],
        "The email has already been taken."
    );
}

#[tokio::test]
async fn update_and_destroy_round_through_the_resource_routes() {
    let (app, storage) = test_app().await;
    let user = create(&app, "Ada", "ada@example.com").await;

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/users/{}", user.id),
            serde_json::json!({ "name": "Ada L.", "email": "ada@example.com", "is_active": false }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let updated: User = read_json(response).await;
    assert_eq!(updated.name, "Ada L.");
    assert!(!updated.is_active);

    let delete = authed(Request::delete(format!("/users/{}", user.id)))
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(delete).await.expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(storage.get_user(user.id).await.expect("get").is_none());

    let again = authed(Request::delete(format!("/users/{}", user.id)))
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(again).await.expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(json_request(
            "PUT",
            "/users/9999",
            serde_json::json!({ "name": "x", "email": "x@example.com", "is_active": true }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn near_miss_tokens_are_rejected() {
    let (app, _storage) = test_app().await;
    let near_misses = [
        "test-toke".to_string(),
        format!("{TOKEN}x"),
        TOKEN.to_uppercase(),
        String::new(),
    ];
    for candidate in near_misses {
        let request = Request::get("/dashboard")
            .header(header::AUTHORIZATION, format!("Bearer {candidate}"))
            .body(Body::empty())
            .expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{candidate:?}");
    }
}

#[tokio::test]
async fn unreadable_page_numbers_fall_back_to_first_and_far_pages_are_empty() {
    let (app, _storage) = test_app().await;
    create(&app, "Ada", "ada@example.com").await;

    let request = authed(Request::get("/users?page=abc"))
        .header(header::ACCEPT, "application/json")
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let page: Page<User> = read_json(response).await;
    assert_eq!(page.current_page, 1);
    assert_eq!(page.data.len(), 1);

    let request = authed(Request::get(format!("/users?page={}", u64::MAX)))
        .header(header::ACCEPT, "application/json")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let page: Page<User> = read_json(response).await;
    assert!(page.data.is_empty());
    assert_eq!(page.total, 1);
}

fn raw_request(method: &str, uri: &str, content_type: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = authed(Request::builder().method(method).uri(uri))
        .header(header::ACCEPT, "application/json");
    if let Some(content_type) = content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    builder.body(Body::from(body.to_string())).expect("request")
}

#[tokio::test]
async fn unreadable_bodies_answer_with_api_errors() {
    let (app, _storage) = test_app().await;

    let response = app
        .clone()
        .oneshot(raw_request("POST", "/users", Some("application/json"), "{\"name\":"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let err: ApiError = read_json(response).await;
    assert_eq!(err.code, ErrorCode::BadRequest);

    let response = app
        .clone()
        .oneshot(raw_request("POST", "/users", None, "{}"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let err: ApiError = read_json(response).await;
    assert_eq!(err.code, ErrorCode::BadRequest);
}

#[tokio::test]
async fn non_object_body_fails_validation_per_field() {
    let (app, _storage) = test_app().await;
    let response = app
        .oneshot(raw_request("POST", "/users", Some("application/json"), "[1, 2]"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let err: ApiError = read_json(response).await;
    assert_eq!(err.code, ErrorCode::Validation);
    assert_eq!(err.errors["name"], vec!["The name field is required."]);
    assert_eq!(err.errors["email"], vec!["The email field is required."]);
    assert_eq!(err.errors["is_active"], vec!["The is_active field is required."]);
}

#[tokio::test]
async fn non_numeric_user_id_is_not_found() {
    let (app, _storage) = test_app().await;

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            "/users/abc",
            serde_json::json!({ "name": "x", "email": "x@example.com", "is_active": true }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let err: ApiError = read_json(response).await;
    assert_eq!(err.code, ErrorCode::NotFound);

    let delete = authed(Request::delete("/users/abc"))
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(delete).await.expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
