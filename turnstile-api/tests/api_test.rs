use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tower::ServiceExt;
use turnstile_api::{
    app,
    middleware::OrganizerClaims,
    state::{AppState, AuthConfig},
};
use turnstile_store::{InMemoryTicketRepository, LocalDocumentStore};
use turnstile_ticket::{
    DocumentPipeline, HtmlSheetRenderer, IssuanceService, PersistenceGateway, QrRenderer,
};

const SECRET: &str = "test-secret";

fn token(owner: &str, role: &str) -> String {
    let claims = OrganizerClaims {
        sub: owner.to_string(),
        role: role.to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

fn issuance(repo: Arc<InMemoryTicketRepository>) -> IssuanceService {
    IssuanceService::new(PersistenceGateway::new(repo, 2), QrRenderer::new(64, 1))
}

fn router(repo: Arc<InMemoryTicketRepository>, issuance: IssuanceService) -> Router {
    let auth = AuthConfig {
        secret: SECRET.to_string(),
    };
    app(AppState::new(repo, issuance, auth).unwrap())
}

fn test_app(unit_delay: Duration) -> Router {
    let repo = Arc::new(InMemoryTicketRepository::new());
    let issuance = issuance(repo.clone()).with_unit_delay(unit_delay);
    router(repo, issuance)
}

/// Sheets are written under `root` and served from a fixed base URL
fn test_app_with_documents(root: &Path) -> Router {
    let repo = Arc::new(InMemoryTicketRepository::new());
    let issuance = issuance(repo.clone()).with_documents(DocumentPipeline {
        renderer: Arc::new(HtmlSheetRenderer::new().unwrap()),
        store: Arc::new(LocalDocumentStore::new(root, "https://tickets.test/documents")),
    });
    router(repo, issuance)
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    owner: Option<&str>,
    body: Option<Value>) -> (StatusCode, Value,
) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(owner) = owner {
        builder = builder.header("Authorization", format!("Bearer {}", token(owner, "ORGANIZER")));
    }
    let request = match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn batch_body(tiers: Value) -> Value {
    json!({
        "title": "Harbour Derby",
        "event_date": "2026-11-21",
        "start_time": "19:30",
        "end_time": "21:30",
        "home_team": "Harbour FC",
        "away_team": "Rivermouth",
        "tiers": tiers,
    })
}

/// Poll until the run has recorded its outcome
async fn wait_for_outcome(app: &Router, owner: &str, run_id: &str) -> Value {
    for _ in 0..200 {
        let (status, run) = call(app, "GET", &format!("/v1/runs/{}", run_id), Some(owner), None).await;
        assert_eq!(status, StatusCode::OK);
        if !run["outcome"].is_null() {
            return run;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {} did not finish", run_id);
}

#[tokio::test]
async fn test_health_is_public() {
    let app = test_app(Duration::ZERO);
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_protected_routes_require_organizer_token() {
    let app = test_app(Duration::ZERO);

    let (status, _) = call(&app, "GET", "/v1/batches", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/v1/batches")
        .header("Authorization", format!("Bearer {}", token("organizer-1", "CUSTOMER")))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_invalid_batch_is_rejected_before_any_write() {
    let app = test_app(Duration::ZERO);

    let (status, body) = call(
        &app,
        "POST",
        "/v1/batches",
        Some("organizer-1"),
        Some(batch_body(json!([{ "name": "VIP", "price": -5.0, "quantity": 2 }]))),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("price"));

    let (_, batches) = call(&app, "GET", "/v1/batches", Some("organizer-1"), None).await;
    assert_eq!(batches.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_issue_list_and_scan() {
    let app = test_app(Duration::ZERO);

    let (status, created) = call(
        &app,
        "POST",
        "/v1/batches",
        Some("organizer-1"),
        Some(batch_body(json!([
            { "name": "VIP", "price": 100.0, "quantity": 2 },
            { "name": "Standard", "price": 50.0, "quantity": 3 }
        ]))),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(created["total"], 5);
    assert_eq!(created["price"], 70.0);
    assert_eq!(created["total_revenue"], 350.0);

    let run_id = created["run_id"].as_str().unwrap().to_string();
    let run = wait_for_outcome(&app, "organizer-1", &run_id).await;
    assert_eq!(run["progress"]["status"], "COMPLETED");
    assert_eq!(run["progress"]["percentage"], 100);
    assert_eq!(run["outcome"]["result"], "issued");
    assert_eq!(run["outcome"]["tickets_committed"], 5);

    // Other owners see nothing
    let (status, _) = call(&app, "GET", &format!("/v1/runs/{}", run_id), Some("organizer-2"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, batches) = call(&app, "GET", "/v1/batches", Some("organizer-1"), None).await;
    let batches = batches.as_array().unwrap().clone();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0]["issued_count"], 5);
    assert_eq!(batches[0]["used_count"], 0);
    let batch_id = batches[0]["id"].as_str().unwrap().to_string();

    let (status, detail) = call(&app, "GET", &format!("/v1/batches/{}", batch_id), Some("organizer-1"), None).await;
    assert_eq!(status, StatusCode::OK);
    let tickets = detail["tickets"].as_array().unwrap().clone();
    assert_eq!(tickets.len(), 5);
    assert_eq!(detail["tiers"].as_array().unwrap().len(), 2);
    let payload = tickets[0]["qr_payload"].as_str().unwrap().to_string();

    let (status, first) = call(&app, "POST", "/v1/scan", Some("organizer-1"), Some(json!({ "code": payload }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["outcome"], "ACCEPTED");

    let (_, second) = call(&app, "POST", "/v1/scan", Some("organizer-1"), Some(json!({ "code": payload }))).await;
    assert_eq!(second["outcome"], "ALREADY_USED");
    assert!(!second["validated_at"].is_null());

    let (_, foreign) = call(&app, "POST", "/v1/scan", Some("organizer-2"), Some(json!({ "code": payload }))).await;
    assert_eq!(foreign["outcome"], "NOT_FOUND");

    let (_, detail) = call(&app, "GET", &format!("/v1/batches/{}", batch_id), Some("organizer-1"), None).await;
    assert_eq!(detail["used_count"], 1);

    let metrics = app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let text = metrics.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(text.to_vec()).unwrap();
    assert!(text.contains("turnstile_tickets_issued_total 5"));
}

#[tokio::test]
async fn test_cancel_then_reset_run() {
    let app = test_app(Duration::from_millis(50));

    let (_, created) = call(
        &app,
        "POST",
        "/v1/batches",
        Some("organizer-1"),
        Some(batch_body(json!([{ "name": "Standard", "price": 20.0, "quantity": 40 }]))),
    )
    .await;
    let run_id = created["run_id"].as_str().unwrap().to_string();

    // Let a few units through first
    tokio::time::sleep(Duration::from_millis(120)).await;
    let (status, _) = call(&app, "POST", &format!("/v1/runs/{}/cancel", run_id), Some("organizer-1"), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let run = wait_for_outcome(&app, "organizer-1", &run_id).await;
    assert_eq!(run["progress"]["status"], "CANCELLED");
    let committed = run["outcome"]["tickets_committed"].as_u64().unwrap();
    assert!(committed < 40);

    // Aggregates keep the requested quantity, so the batch shows up as incomplete
    let (_, incomplete) = call(&app, "GET", "/v1/batches/incomplete", Some("organizer-1"), None).await;
    let incomplete = incomplete.as_array().unwrap().clone();
    assert_eq!(incomplete.len(), 1);
    assert_eq!(incomplete[0]["expected_tickets"], 40);

    let (status, _) = call(&app, "POST", &format!("/v1/runs/{}/cancel", run_id), Some("organizer-1"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, reset) = call(&app, "POST", &format!("/v1/runs/{}/reset", run_id), Some("organizer-1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reset["progress"]["status"], "IDLE");

    // Clean up the partial batch
    let batch_id = incomplete[0]["batch"]["id"].as_str().unwrap().to_string();
    let (status, report) = call(&app, "DELETE", &format!("/v1/batches/{}", batch_id), Some("organizer-1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["tickets_deleted"].as_u64().unwrap(), committed);
    assert_eq!(report["batch_deleted"], true);
}

#[tokio::test]
async fn test_unknown_batch_returns_not_found() {
    let app = test_app(Duration::ZERO);
    let missing = uuid::Uuid::new_v4();

    let (status, _) = call(&app, "GET", &format!("/v1/batches/{}", missing), Some("organizer-1"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app, "DELETE", &format!("/v1/batches/{}", missing), Some("organizer-1"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_failed_run_can_be_compensated() {
    let app = test_app(Duration::ZERO);
    let mut body = batch_body(json!([{ "name": "Standard", "price": 10.0, "quantity": 2 }]));
    // Too long to fit in a QR code, so rendering fails after the tier insert
    body["title"] = json!("T".repeat(3_000));

    let (status, created) = call(&app, "POST", "/v1/batches", Some("organizer-1"), Some(body)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let run_id = created["run_id"].as_str().unwrap().to_string();

    let run = wait_for_outcome(&app, "organizer-1", &run_id).await;
    assert_eq!(run["progress"]["status"], "ERROR");
    assert_eq!(run["outcome"]["result"], "failed");
    assert_eq!(run["outcome"]["created"]["tier_ids"].as_array().unwrap().len(), 1);

    let uri = format!("/v1/runs/{}/compensate", run_id);
    let (status, _) = call(&app, "POST", &uri, Some("organizer-2"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, report) = call(&app, "POST", &uri, Some("organizer-1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["batch_deleted"], true);
    assert_eq!(report["tiers_deleted"], 1);

    let (_, batches) = call(&app, "GET", "/v1/batches", Some("organizer-1"), None).await;
    assert!(batches.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_completed_run_cannot_be_compensated() {
    let app = test_app(Duration::ZERO);
    let body = batch_body(json!([{ "name": "Standard", "price": 10.0, "quantity": 1 }]));
    let (_, created) = call(&app, "POST", "/v1/batches", Some("organizer-1"), Some(body)).await;
    let run_id = created["run_id"].as_str().unwrap().to_string();
    wait_for_outcome(&app, "organizer-1", &run_id).await;

    let uri = format!("/v1/runs/{}/compensate", run_id);
    let (status, _) = call(&app, "POST", &uri, Some("organizer-1"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_document_is_published_and_regenerated() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app_with_documents(dir.path());
    let body = batch_body(json!([{ "name": "VIP", "price": 80.0, "quantity": 2 }]));

    let (_, created) = call(&app, "POST", "/v1/batches", Some("organizer-1"), Some(body)).await;
    let run_id = created["run_id"].as_str().unwrap().to_string();
    let run = wait_for_outcome(&app, "organizer-1", &run_id).await;
    let batch_id = run["outcome"]["batch"]["id"].as_str().unwrap().to_string();
    let first_url = run["outcome"]["document_url"].as_str().unwrap().to_string();
    assert!(first_url.starts_with("https://tickets.test/documents/organizer-1/"));

    let uri = format!("/v1/batches/{}/document", batch_id);
    let (status, regenerated) = call(&app, "POST", &uri, Some("organizer-1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(regenerated["document_url"], first_url.as_str());

    let sheet = dir
        .path()
        .join("organizer-1")
        .join(&batch_id)
        .join(first_url.rsplit('/').next().unwrap());
    let html = std::fs::read_to_string(sheet).unwrap();
    assert_eq!(html.matches("class=\"card\"").count(), 2);

    let (status, _) = call(&app, "POST", &uri, Some("organizer-2"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_document_regeneration_needs_a_pipeline() {
    let app = test_app(Duration::ZERO);
    let body = batch_body(json!([{ "name": "VIP", "price": 80.0, "quantity": 1 }]));
    let (_, created) = call(&app, "POST", "/v1/batches", Some("organizer-1"), Some(body)).await;
    let run_id = created["run_id"].as_str().unwrap().to_string();
    let run = wait_for_outcome(&app, "organizer-1", &run_id).await;
    let batch_id = run["outcome"]["batch"]["id"].as_str().unwrap().to_string();

    let uri = format!("/v1/batches/{}/document", batch_id);
    let (status, _) = call(&app, "POST", &uri, Some("organizer-1"), None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_run_events_stream_progress() {
    let app = test_app(Duration::ZERO);
    let body = batch_body(json!([{ "name": "Standard", "price": 15.0, "quantity": 3 }]));
    let (_, created) = call(&app, "POST", "/v1/batches", Some("organizer-1"), Some(body)).await;
    let run_id = created["run_id"].as_str().unwrap().to_string();
    wait_for_outcome(&app, "organizer-1", &run_id).await;

    let request = Request::builder()
        .uri(format!("/v1/runs/{}/events", run_id))
        .header("Authorization", format!("Bearer {}", token("organizer-1", "ORGANIZER")))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/event-stream"));

    // A finished run yields its final snapshot and the stream ends
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let events = text
        .lines()
        .filter(|line| line.starts_with("event:") && line.ends_with("progress"))
        .count();
    assert_eq!(events, 1);
    assert!(text.contains("\"status\":\"COMPLETED\""));
    assert!(text.contains("\"current\":3"));
}
