//! Handler-level tests against the assembled router, driving it with
//! in-memory requests the way a replica's HTTP client would.

use std::sync::Arc;

use axum::{
    Extension, Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use tower::ServiceExt;

use replidoc_core::changeset::{Changeset, ChangesetResult};
use replidoc_core::document::Revision;
use replidoc_core::primary::Primary;
use replidoc_server::{
    auth::{AuthExtractor, Sessions},
    handlers::{ApiState, AuthState, api_routes, auth_routes},
};

const PASSWORD: &str = "hunter2";
const BOUNDARY: &str = "replidoc-test-boundary";

fn app(primary: Arc<Primary>) -> Router {
    let sessions = Sessions::new();
    let auth_extractor = AuthExtractor::new(sessions.clone());

    Router::new()
        .nest(
            "/api",
            auth_routes(AuthState {
                sessions,
                password: PASSWORD.to_string(),
            })
            .merge(api_routes(ApiState { primary })),
        )
        .layer(Extension(auth_extractor))
}

async fn login(app: &Router) -> String {
    let response = app
        .clone()
        .oneshot(
            Request::post("/api/auth")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(format!(r#"{{"password":"{PASSWORD}"}}"#)))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    body["token"].as_str().unwrap().to_string()
}

fn multipart_changeset(changeset: &Changeset) -> (String, Body) {
    let json = serde_json::to_string(changeset).unwrap();
    let body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"changeset\"\r\n\r\n{json}\r\n--{BOUNDARY}--\r\n"
    );

    (
        format!("multipart/form-data; boundary={BOUNDARY}"),
        Body::from(body),
    )
}

#[tokio::test]
async fn wrong_password_is_unauthorized() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(Arc::new(Primary::open(dir.path()).unwrap()));

    let response = app
        .oneshot(
            Request::post("/api/auth")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"password":"wrong"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn changeset_requires_a_session_token() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(Arc::new(Primary::open(dir.path()).unwrap()));

    let (content_type, body) = multipart_changeset(&Changeset::empty(Revision::ZERO));
    let response = app
        .oneshot(
            Request::post("/api/changeset")
                .header(header::CONTENT_TYPE, content_type)
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn empty_changeset_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(Arc::new(Primary::open(dir.path()).unwrap()));
    let token = login(&app).await;

    let (content_type, body) = multipart_changeset(&Changeset::empty(Revision::ZERO));
    let response = app
        .clone()
        .oneshot(
            Request::post("/api/changeset")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .header(header::CONTENT_TYPE, content_type)
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let result: ChangesetResult = serde_json::from_slice(&bytes).unwrap();
    assert!(result.is_accepted());
    assert_eq!(result.current_rev, Revision::ZERO);
}

#[tokio::test]
async fn impossible_base_rev_is_a_conflict_status() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(Arc::new(Primary::open(dir.path()).unwrap()));
    let token = login(&app).await;

    // base rev ahead of a fresh primary
    let (content_type, body) = multipart_changeset(&Changeset::empty(Revision(7)));
    let response = app
        .clone()
        .oneshot(
            Request::post("/api/changeset")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .header(header::CONTENT_TYPE, content_type)
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn missing_attachment_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(Arc::new(Primary::open(dir.path()).unwrap()));
    let token = login(&app).await;

    let response = app
        .clone()
        .oneshot(
            Request::get("/api/file/doesnotexist")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
