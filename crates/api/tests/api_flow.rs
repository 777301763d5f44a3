use std::time::Duration;

use api::{ApiConfig, AppState, build_router};
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use learnsy_core::time::fixed_now;
use serde_json::{Value, json};
use services::{AppServices, Clock, ServicesConfig};
use tower::util::ServiceExt;

const BOUNDARY: &str = "learnsy-test-boundary";

fn create_test_app(upload_dir: &std::path::Path) -> Router {
    let mut config = ServicesConfig::new("api-test-secret");
    config.upload_dir = upload_dir.to_path_buf();
    config.ai_delay = Duration::ZERO;
    let services = AppServices::in_memory(Clock::fixed(fixed_now()), &config);
    build_router(AppState::new(services), &ApiConfig::default())
}

async fn read_json(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    read_json(app.clone().oneshot(request).await.unwrap()).await
}

async fn register(app: &Router, email: &str, role: &str) -> String {
    let (status, json) = send(
        app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({
            "name": "Test User",
            "email": email,
            "password": "correct-horse",
            "role": role,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{json}");
    json["data"]["token"].as_str().unwrap().to_owned()
}

async fn published_course(app: &Router, faculty: &str) -> u64 {
    let (status, json) = send(
        app,
        "POST",
        "/api/courses",
        Some(faculty),
        Some(json!({
            "title": "Rust Basics",
            "description": "Ownership and borrowing",
            "modules": [{ "title": "Start", "lessons": [{ "title": "Hello" }] }],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{json}");
    let id = json["data"]["id"].as_u64().unwrap();

    let (status, _) = send(
        app,
        "POST",
        &format!("/api/courses/{id}/publish"),
        Some(faculty),
        Some(json!({ "published": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    id
}

fn multipart_upload(fields: &[(&str, &str)], file: (&str, &str, &[u8])) -> Body {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    let (file_name, content_type, bytes) = file;
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    Body::from(body)
}

#[tokio::test]
async fn test_health_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_app(dir.path());

    let (status, json) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["status"], "ok");
}

#[tokio::test]
async fn test_missing_or_bad_token_is_unauthorized() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_app(dir.path());

    let (status, json) = send(&app, "GET", "/api/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["success"], false);
    assert!(json["message"].is_string());

    let (status, _) = send(&app, "GET", "/api/auth/me", Some("not.a.jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_wrong_role_is_forbidden() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_app(dir.path());
    let student = register(&app, "student@example.com", "student").await;

    let (status, json) = send(
        &app,
        "POST",
        "/api/courses",
        Some(&student),
        Some(json!({ "title": "Nope" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["success"], false);

    let (status, json) = send(&app, "GET", "/api/auth/me", Some(&student), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["email"], "student@example.com");
    assert!(json["data"].get("passwordHash").is_none());
}

#[tokio::test]
async fn test_duplicate_registration_and_enrollment_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_app(dir.path());
    let faculty = register(&app, "prof@example.com", "faculty").await;
    let student = register(&app, "student@example.com", "student").await;

    let (status, _) = send(
        &app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({
            "name": "Again",
            "email": "Student@Example.com",
            "password": "correct-horse",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let course = published_course(&app, &faculty).await;
    let enroll = format!("/api/courses/{course}/enroll");
    let (status, _) = send(&app, "POST", &enroll, Some(&student), None).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, json) = send(&app, "POST", &enroll, Some(&student), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);

    let (status, json) = send(&app, "GET", "/api/enrollments", Some(&student), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_upload_download_and_complete_material() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_app(dir.path());
    let faculty = register(&app, "prof@example.com", "faculty").await;
    let student = register(&app, "student@example.com", "student").await;
    let course = published_course(&app, &faculty).await;
    send(&app, "POST", &format!("/api/courses/{course}/enroll"), Some(&student), None).await;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/courses/{course}/materials"))
        .header(header::AUTHORIZATION, format!("Bearer {faculty}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(multipart_upload(
            &[("title", "Slides"), ("description", "Week one")],
            ("week1.pdf", "application/pdf", b"%PDF-1.4 slides"),
        ))
        .unwrap();
    let (status, json) = read_json(app.clone().oneshot(request).await.unwrap()).await;
    assert_eq!(status, StatusCode::CREATED, "{json}");
    let material = json["data"]["id"].as_u64().unwrap();

    let (status, json) = send(
        &app,
        "GET",
        &format!("/api/courses/{course}/materials"),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"][0]["locked"], false);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/materials/{material}/download"))
                .header(header::AUTHORIZATION, format!("Bearer {student}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"%PDF-1.4 slides");

    let complete = format!("/api/materials/{material}/complete");
    let (status, json) = send(&app, "POST", &complete, Some(&student), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["completed"], true);
    assert_eq!(json["data"]["percent"], 50);
    let (_, json) = send(&app, "POST", &complete, Some(&student), None).await;
    assert_eq!(json["data"]["percent"], 0);

    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/api/materials/{material}"),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_ai_summary_requires_premium() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_app(dir.path());
    let faculty = register(&app, "prof@example.com", "faculty").await;
    let student = register(&app, "student@example.com", "student").await;
    let course = published_course(&app, &faculty).await;
    send(&app, "POST", &format!("/api/courses/{course}/enroll"), Some(&student), None).await;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/courses/{course}/materials"))
        .header(header::AUTHORIZATION, format!("Bearer {faculty}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(multipart_upload(
            &[("title", "Notes"), ("description", "Borrowing rules. Lifetimes.")],
            ("notes.txt", "text/plain", b"notes"),
        ))
        .unwrap();
    let (_, json) = read_json(app.clone().oneshot(request).await.unwrap()).await;
    let material = json["data"]["id"].as_u64().unwrap();

    let summary = json!({ "materialId": material });
    let (status, json) = send(&app, "POST", "/api/ai/summary", Some(&student), Some(summary.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["success"], false);

    let (status, json) = send(
        &app,
        "POST",
        "/api/payments/qr",
        Some(&student),
        Some(json!({ "plan": "premium" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{json}");
    let reference = json["data"]["reference"].as_str().unwrap().to_owned();

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/payments/{reference}/confirm"),
        Some(&faculty),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, json) = send(
        &app,
        "POST",
        &format!("/api/payments/{reference}/confirm"),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["data"]["subscription"]["effectivePlan"], "premium");

    let (status, json) = send(&app, "POST", "/api/ai/summary", Some(&student), Some(summary)).await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["data"]["model"], "learnsy-mock-1");
}

#[tokio::test]
async fn test_malformed_input_gets_the_error_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_app(dir.path());

    let (status, json) = send(
        &app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({ "email": "a@example.com", "password": "correct-horse" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
    assert!(json["message"].as_str().unwrap().contains("name"), "{json}");

    let request = Request::builder()
        .method("POST")
        .uri("/api/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, json) = read_json(app.clone().oneshot(request).await.unwrap()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
    assert!(json["message"].is_string());

    let student = register(&app, "student@example.com", "student").await;
    let (status, json) = send(&app, "GET", "/api/courses/abc", Some(&student), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
    assert!(json["message"].is_string());

    let (status, json) = send(&app, "GET", "/api/courses?limit=many", Some(&student), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_plans_are_public() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_app(dir.path());

    let (status, json) = send(&app, "GET", "/api/subscriptions/plans", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"].as_array().unwrap().len(), 3);
}
