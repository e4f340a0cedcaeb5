// ABOUTME: Integration tests for the HTTP API router.
// ABOUTME: Drives the axum router in-process with tower's oneshot.

mod support;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use lookout::agent::Agent;
use lookout::api;
use lookout::notify::Fanout;
use lookout::runtime::MemoryRuntime;
use lookout::runtime::memory::ContainerFixture;
use lookout::update::{Coordinator, ScanLock, Trigger};
use serde_json::Value;
use std::sync::Arc;
use support::{digest, fast_policy, seed};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

fn agent(lock: ScanLock) -> (Agent, Arc<MemoryRuntime>) {
    let runtime = Arc::new(MemoryRuntime::new());
    seed(&runtime, "nginx:1.25", vec![ContainerFixture::new("web", "nginx:1.25")]);
    runtime.publish("nginx:1.25", &digest('b'));
    let coordinator = Coordinator::new(
        "local",
        runtime.clone(),
        fast_policy(),
        lock,
        CancellationToken::new(),
    );
    let agent = Agent::new(vec![coordinator], Fanout::default(), CancellationToken::new());
    (agent, runtime)
}

async fn json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_update(token: Option<&str>) -> Request<Body> {
    let mut request = Request::post("/v1/update");
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    request.body(Body::from("payload is ignored")).unwrap()
}

#[tokio::test]
async fn update_without_token_is_rejected() {
    let (agent, runtime) = agent(ScanLock::new());
    let app = api::router(agent.clone(), Some("s3cret".into()));

    let response = app.oneshot(post_update(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    agent.drain().await;
    assert!(agent.sessions().all().is_empty());
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn update_with_wrong_token_is_rejected() {
    let (agent, _runtime) = agent(ScanLock::new());
    let app = api::router(agent, Some("s3cret".into()));

    let response = app.oneshot(post_update(Some("guess"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn update_triggers_a_session() {
    support::init_tracing();
    let (agent, runtime) = agent(ScanLock::new());
    let app = api::router(agent.clone(), Some("s3cret".into()));

    let response = app.oneshot(post_update(Some("s3cret"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json(response).await["accepted"], true);

    agent.drain().await;
    let session = agent.sessions().get("local").unwrap();
    assert_eq!(session.trigger, Trigger::Api);
    assert_eq!(session.counts.updated, 1);
    assert_eq!(
        runtime.container("web").unwrap().digest.unwrap().as_str(),
        digest('b')
    );
}

#[tokio::test]
async fn update_while_busy_still_succeeds() {
    let lock = ScanLock::new();
    let (agent, runtime) = agent(lock.clone());
    let app = api::router(agent.clone(), None);
    let guard = lock.try_acquire(Trigger::Schedule).unwrap();

    let response = app.oneshot(post_update(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json(response).await["busy"], true);

    agent.drain().await;
    drop(guard);
    assert!(agent.sessions().all().is_empty());
    assert!(runtime.mutations().is_empty());
}

#[tokio::test]
async fn update_accepts_bodies_beyond_the_default_limit() {
    let (agent, _runtime) = agent(ScanLock::new());
    let app = api::router(agent.clone(), None);
    let request = Request::post("/v1/update")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(vec![b' '; 3 * 1024 * 1024]))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json(response).await["accepted"], true);
    agent.drain().await;
}

#[tokio::test]
async fn session_endpoint_returns_last_results() {
    let (agent, _runtime) = agent(ScanLock::new());
    agent.run_all(Trigger::Manual, true).await;
    let app = api::router(agent, None);

    let response = app
        .oneshot(Request::get("/v1/session").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json(response).await;
    let sessions = body["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["provider"], "local");
    assert_eq!(sessions[0]["status"], "succeeded");
    assert_eq!(sessions[0]["trigger"], "manual");
    assert_eq!(sessions[0]["containers"][0]["name"], "web");
    assert_eq!(sessions[0]["containers"][0]["outcome"], "updated");
}

#[tokio::test]
async fn healthz_lists_providers() {
    let (agent, _runtime) = agent(ScanLock::new());
    let app = api::router(agent, Some("s3cret".into()));

    let response = app
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["providers"][0], "local");
}
