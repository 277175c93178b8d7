//! End-to-end saga tests: both services wired over one in-memory bus, all
//! assertions made through the two HTTP surfaces.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceExt;

use audit_service::store::InMemoryAuditStore;
use messaging::{AuditEnvelope, InMemoryMessageBus, subjects};
use transaction_service::auth::JwtKeys;
use transaction_service::config::DeploymentEnv;
use transaction_service::{cors_layer, create_app, create_in_memory_state};

const ACK_TIMEOUT: Duration = Duration::from_millis(300);
const SETTLE: Duration = Duration::from_millis(50);

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct Platform {
    transactions: Router,
    audit: Router,
    audit_store: InMemoryAuditStore,
    bus: Arc<InMemoryMessageBus>,
}

/// Boots both services against one bus, the way the real deployment wires
/// them through the broker.
async fn boot() -> Platform {
    let bus = Arc::new(InMemoryMessageBus::new());

    let audit_state = audit_service::create_in_memory_state(bus.clone()).await;
    let audit_store = audit_state.store.clone();
    let audit = audit_service::create_app(
        audit_state,
        get_metrics_handle(),
        audit_service::cors_layer(&[], audit_service::config::DeploymentEnv::Development),
    );

    let jwt = JwtKeys::new(
        "end-to-end-test-secret-0123456789abcdef",
        Duration::from_secs(3600),
    );
    let txn_state = create_in_memory_state(jwt, ACK_TIMEOUT, bus.clone()).await;
    let transactions = create_app(
        txn_state,
        get_metrics_handle(),
        cors_layer(&[], DeploymentEnv::Development),
    );

    Platform {
        transactions,
        audit,
        audit_store,
        bus,
    }
}

async fn send_json(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn login(app: &Router) -> (String, String) {
    send_json(
        app,
        "POST",
        "/api/auth/register",
        None,
        Some(serde_json::json!({
            "username": "testuser",
            "email": "testuser@example.com",
            "password": "password123"
        })),
    )
    .await;
    let (_, body) = send_json(
        app,
        "POST",
        "/api/auth/login",
        None,
        Some(serde_json::json!({"username": "testuser", "password": "password123"})),
    )
    .await;
    let token = body["data"]["accessToken"].as_str().unwrap().to_string();
    let user_id = body["data"]["user"]["id"].as_str().unwrap().to_string();
    (token, user_id)
}

async fn audit_rows_for(platform: &Platform, id: &str) -> Vec<serde_json::Value> {
    let (status, body) = send_json(
        &platform.audit,
        "GET",
        &format!("/api/audit-logs/entity/Transaction/{id}"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["data"].as_array().unwrap().clone()
}

#[tokio::test]
async fn create_update_delete_leave_a_complete_audit_trail() {
    let platform = boot().await;
    let (token, user_id) = login(&platform.transactions).await;

    // -- create --
    let (status, created) = send_json(
        &platform.transactions,
        "POST",
        "/api/transactions",
        Some(&token),
        Some(serde_json::json!({"amount": "100.50", "currency": "USD", "description": "Test"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["data"]["status"], "PENDING");
    let id = created["data"]["id"].as_str().unwrap().to_string();

    tokio::time::sleep(SETTLE).await;
    let rows = audit_rows_for(&platform, &id).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["action"], "CREATE");
    assert_eq!(rows[0]["status"], "SUCCESS");
    assert_eq!(rows[0]["userId"], user_id);
    assert_eq!(rows[0]["changes"]["after"]["amount"], "100.50");
    assert!(rows[0]["changes"].get("before").is_none());

    // -- update --
    let (status, updated) = send_json(
        &platform.transactions,
        "PUT",
        &format!("/api/transactions/{id}"),
        Some(&token),
        Some(serde_json::json!({"amount": "150.75", "status": "COMPLETED"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["data"]["amount"], "150.75");

    tokio::time::sleep(SETTLE).await;
    let rows = audit_rows_for(&platform, &id).await;
    assert_eq!(rows.len(), 2);
    // newest first on the entity endpoint
    assert_eq!(rows[0]["action"], "UPDATE");
    assert_eq!(rows[0]["changes"]["before"]["amount"], "100.50");
    assert_eq!(rows[0]["changes"]["after"]["amount"], "150.75");
    assert_eq!(rows[0]["changes"]["after"]["status"], "COMPLETED");

    // -- delete --
    let (status, _) = send_json(
        &platform.transactions,
        "DELETE",
        &format!("/api/transactions/{id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send_json(
        &platform.transactions,
        "GET",
        &format!("/api/transactions/{id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    tokio::time::sleep(SETTLE).await;
    let rows = audit_rows_for(&platform, &id).await;
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["action"], "DELETE");
    assert_eq!(rows[0]["changes"]["before"]["status"], "COMPLETED");
    assert!(rows[0]["changes"].get("after").is_none());
}

#[tokio::test]
async fn every_audit_row_is_reachable_by_its_correlation_id() {
    let platform = boot().await;
    let (token, _) = login(&platform.transactions).await;

    send_json(
        &platform.transactions,
        "POST",
        "/api/transactions",
        Some(&token),
        Some(serde_json::json!({"amount": "42.00", "currency": "GBP"})),
    )
    .await;
    tokio::time::sleep(SETTLE).await;

    // the correlation id on the wire is the one the audit store received
    let envelope: AuditEnvelope =
        serde_json::from_slice(&platform.bus.published_payloads(subjects::AUDIT_LOG_CREATE)[0])
            .unwrap();

    let (status, body) = send_json(
        &platform.audit,
        "GET",
        &format!("/api/audit-logs/correlation/{}", envelope.correlation_id),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let rows = body["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0]["correlationId"].as_str().unwrap(),
        envelope.correlation_id.to_string()
    );
}

#[tokio::test]
async fn audit_write_failure_leaves_both_sides_empty() {
    let platform = boot().await;
    let (token, _) = login(&platform.transactions).await;
    platform.audit_store.set_fail_inserts(true);

    let (status, body) = send_json(
        &platform.transactions,
        "POST",
        "/api/transactions",
        Some(&token),
        Some(serde_json::json!({"amount": "10.00", "currency": "USD"})),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "DISTRIBUTED_TRANSACTION_ERROR");

    let (_, list) = send_json(
        &platform.transactions,
        "GET",
        "/api/transactions",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(list["data"]["total"], 0);
    assert_eq!(platform.audit_store.row_count().await, 0);
}

#[tokio::test]
async fn lost_ack_self_heals_through_compensation() {
    let platform = boot().await;
    let (token, _) = login(&platform.transactions).await;

    // the consumer writes its row but its acknowledgement never arrives
    platform
        .bus
        .set_fail_publish(subjects::AUDIT_LOG_CREATED, true);

    let (status, _) = send_json(
        &platform.transactions,
        "POST",
        "/api/transactions",
        Some(&token),
        Some(serde_json::json!({"amount": "10.00", "currency": "USD"})),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    // locally absent
    let (_, list) = send_json(
        &platform.transactions,
        "GET",
        "/api/transactions",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(list["data"]["total"], 0);

    // remotely the orphaned row converges to ROLLED_BACK
    tokio::time::sleep(SETTLE).await;
    let envelope: AuditEnvelope =
        serde_json::from_slice(&platform.bus.published_payloads(subjects::AUDIT_LOG_CREATE)[0])
            .unwrap();
    let (_, body) = send_json(
        &platform.audit,
        "GET",
        &format!("/api/audit-logs/correlation/{}", envelope.correlation_id),
        None,
        None,
    )
    .await;
    let rows = body["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["status"], "ROLLED_BACK");
}

#[tokio::test]
async fn concurrent_creates_settle_with_matching_audit_rows() {
    let platform = boot().await;
    let (token, _) = login(&platform.transactions).await;

    let mut handles = Vec::new();
    for i in 0..5 {
        let app = platform.transactions.clone();
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            let request = Request::builder()
                .method("POST")
                .uri("/api/transactions")
                .header("authorization", format!("Bearer {token}"))
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({"amount": format!("10{i}.00"), "currency": "USD"})
                        .to_string(),
                ))
                .unwrap();
            app.oneshot(request).await.unwrap().status()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::CREATED);
    }

    let (_, list) = send_json(
        &platform.transactions,
        "GET",
        "/api/transactions",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(list["data"]["total"], 5);

    tokio::time::sleep(SETTLE).await;
    let (_, audits) = send_json(
        &platform.audit,
        "GET",
        "/api/audit-logs?action=CREATE&status=SUCCESS&limit=100",
        None,
        None,
    )
    .await;
    assert_eq!(audits["data"]["total"], 5);

    let mut correlation_ids: Vec<String> = audits["data"]["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["correlationId"].as_str().unwrap().to_string())
        .collect();
    correlation_ids.sort();
    correlation_ids.dedup();
    assert_eq!(correlation_ids.len(), 5);
}
