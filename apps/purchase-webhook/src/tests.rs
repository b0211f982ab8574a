use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::header::{ALLOW, CONTENT_TYPE};
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use crate::build_router;
use crate::config::Config;
use crate::purchase::{PurchaseRecord, UpsertPurchaseInput};
use crate::purchase_store::{FilePurchaseStore, PurchaseStore, PurchaseStoreError};
use crate::signature::{SIGNATURE_HEADER, sign_body};

const WEBHOOK_PATH: &str = "/api/webhooks/purchase";

fn test_config() -> Config {
    Config::for_tests()
}

fn test_app(config: Config) -> (Router, FilePurchaseStore) {
    let store = FilePurchaseStore::in_memory();
    let app = build_router(config, Arc::new(store.clone()));
    (app, store)
}

fn order_created(email: Option<&str>) -> String {
    let mut attributes = json!({
        "store_id": 4021,
        "customer_id": 88,
        "total": 4900,
        "currency": "USD",
        "status": "paid",
    });
    if let Some(email) = email {
        attributes["user_email"] = json!(email);
    }

    json!({
        "meta": {"event_name": "order_created", "test_mode": false},
        "data": {"type": "orders", "id": "512", "attributes": attributes}
    })
    .to_string()
}

fn signed_request(config: &Config, payload: &str) -> Result<Request<Body>> {
    let secret = config.webhook_secret.as_deref().unwrap_or_default();
    let signature = sign_body(secret, payload.as_bytes()).unwrap_or_default();
    Ok(Request::builder()
        .method("POST")
        .uri(WEBHOOK_PATH)
        .header(CONTENT_TYPE, "application/json")
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(payload.to_string()))?)
}

async fn read_text(response: axum::response::Response) -> Result<String> {
    let bytes = response.into_body().collect().await?.to_bytes();
    Ok(String::from_utf8(bytes.to_vec())?)
}

async fn read_json(response: axum::response::Response) -> Result<Value> {
    let bytes = response.into_body().collect().await?.to_bytes();
    Ok(serde_json::from_slice(&bytes)?)
}

#[derive(Default)]
struct FailingPurchaseStore {
    calls: AtomicUsize,
}

#[async_trait]
impl PurchaseStore for FailingPurchaseStore {
    async fn upsert_purchase(
        &self,
        _input: UpsertPurchaseInput,
    ) -> Result<PurchaseRecord, PurchaseStoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(PurchaseStoreError::Remote {
            message: "document store write rejected status=503 body=quota-secret-detail"
                .to_string(),
        })
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}

#[tokio::test]
async fn valid_order_created_records_normalized_purchase() -> Result<()> {
    let config = test_config();
    let (app, store) = test_app(config.clone());

    let payload = order_created(Some("Jane.Doe@Example.com "));
    let response = app.oneshot(signed_request(&config, &payload)?).await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok()),
        Some("text/plain; charset=utf-8")
    );
    assert_eq!(read_text(response).await?, "OK");

    let record = store
        .find_purchase("jane.doe@example.com")
        .await
        .expect("recorded purchase");
    assert_eq!(record.email, "jane.doe@example.com");
    assert!(record.verified);
    assert_eq!(record.order_id.as_deref(), Some("512"));
    Ok(())
}

#[tokio::test]
async fn missing_signature_header_is_unauthorized_and_writes_nothing() -> Result<()> {
    let config = test_config();
    let (app, store) = test_app(config);

    let request = Request::builder()
        .method("POST")
        .uri(WEBHOOK_PATH)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(order_created(Some("jane.doe@example.com"))))?;
    let response = app.oneshot(request).await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(read_text(response).await?, "Unauthorized");
    assert_eq!(store.purchase_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn tampered_body_and_garbage_signatures_share_one_unauthorized_response() -> Result<()> {
    let config = test_config();
    let (app, store) = test_app(config.clone());

    let payload = order_created(Some("jane.doe@example.com"));
    let signature = sign_body(
        config.webhook_secret.as_deref().unwrap_or_default(),
        payload.as_bytes(),
    )
    .unwrap_or_default();
    let tampered = payload.replace("jane.doe", "mallory");

    let cases = [
        (tampered, signature.clone()),
        (payload.clone(), "zz-not-hex".to_string()),
        (payload.clone(), signature[..32].to_string()),
        (payload, format!("{signature}00")),
    ];

    for (body, header) in cases {
        let request = Request::builder()
            .method("POST")
            .uri(WEBHOOK_PATH)
            .header(SIGNATURE_HEADER, header)
            .body(Body::from(body))?;
        let response = app.clone().oneshot(request).await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(read_text(response).await?, "Unauthorized");
    }

    assert_eq!(store.purchase_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn purchase_event_without_email_is_a_client_error() -> Result<()> {
    let config = test_config();
    let (app, store) = test_app(config.clone());

    let response = app
        .oneshot(signed_request(&config, &order_created(None))?)
        .await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_text(response).await?, "No email provided");
    assert_eq!(store.purchase_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn unrecognized_event_is_acknowledged_without_a_write() -> Result<()> {
    let config = test_config();
    let (app, store) = test_app(config.clone());

    let payload = json!({
        "meta": {"event_name": "subscription_cancelled"},
        "data": {"id": "77", "attributes": {"user_email": "jane.doe@example.com"}}
    })
    .to_string();
    let response = app.oneshot(signed_request(&config, &payload)?).await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_text(response).await?, "OK");
    assert_eq!(store.purchase_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn non_post_methods_are_rejected_before_any_other_check() -> Result<()> {
    let mut config = test_config();
    config.webhook_secret = None;
    let (app, store) = test_app(config);

    for method in ["GET", "PUT", "DELETE", "PATCH"] {
        let request = Request::builder()
            .method(method)
            .uri(WEBHOOK_PATH)
            .header(SIGNATURE_HEADER, "deadbeef")
            .body(Body::from(order_created(Some("jane.doe@example.com"))))?;
        let response = app.clone().oneshot(request).await?;

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED, "{method}");
        assert_eq!(
            response
                .headers()
                .get(ALLOW)
                .and_then(|value| value.to_str().ok()),
            Some("POST")
        );
        assert_eq!(read_text(response).await?, "Method not allowed");
    }

    assert_eq!(store.purchase_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn unconfigured_secret_fails_closed() -> Result<()> {
    let signing_config = test_config();
    let mut config = signing_config.clone();
    config.webhook_secret = None;
    let (app, store) = test_app(config);

    let payload = order_created(Some("jane.doe@example.com"));
    let response = app.oneshot(signed_request(&signing_config, &payload)?).await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(read_text(response).await?, "Unauthorized");
    assert_eq!(store.purchase_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn repeated_delivery_upserts_a_single_record() -> Result<()> {
    let config = test_config();
    let (app, store) = test_app(config.clone());

    let payload = order_created(Some("repeat@buyer.com"));
    let first = app
        .clone()
        .oneshot(signed_request(&config, &payload)?)
        .await?;
    assert_eq!(first.status(), StatusCode::OK);
    let first_record = store
        .find_purchase("repeat@buyer.com")
        .await
        .expect("first record");

    let shouted = order_created(Some("  REPEAT@Buyer.com"));
    let second = app.oneshot(signed_request(&config, &shouted)?).await?;
    assert_eq!(second.status(), StatusCode::OK);

    assert_eq!(store.purchase_count().await, 1);
    let second_record = store
        .find_purchase("repeat@buyer.com")
        .await
        .expect("second record");
    assert!(second_record.verified_at >= first_record.verified_at);
    Ok(())
}

#[tokio::test]
async fn store_failure_is_reported_without_leaking_detail() -> Result<()> {
    let config = test_config();
    let store = Arc::new(FailingPurchaseStore::default());
    let app = build_router(config.clone(), store.clone());

    let payload = order_created(Some("jane.doe@example.com"));
    let response = app.oneshot(signed_request(&config, &payload)?).await?;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = read_text(response).await?;
    assert_eq!(body, "Internal error");
    assert!(!body.contains("quota-secret-detail"));
    assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn signed_but_undecodable_body_is_an_internal_error() -> Result<()> {
    let config = test_config();
    let (app, store) = test_app(config.clone());

    let response = app
        .oneshot(signed_request(&config, "{\"meta\": ")?)
        .await?;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(read_text(response).await?, "Internal error");
    assert_eq!(store.purchase_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn oversized_body_is_refused() -> Result<()> {
    let mut config = test_config();
    config.webhook_max_body_bytes = 64;
    let (app, store) = test_app(config.clone());

    let payload = order_created(Some("jane.doe@example.com"));
    assert!(payload.len() > 64);
    let response = app.oneshot(signed_request(&config, &payload)?).await?;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(store.purchase_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn oversized_body_without_credentials_is_unauthorized() -> Result<()> {
    let signing_config = test_config();
    let mut config = signing_config.clone();
    config.webhook_max_body_bytes = 64;
    config.webhook_secret = None;
    let (app, store) = test_app(config.clone());

    let payload = order_created(Some("jane.doe@example.com"));
    assert!(payload.len() > 64);
    let response = app
        .clone()
        .oneshot(signed_request(&signing_config, &payload)?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(read_text(response).await?, "Unauthorized");

    config.webhook_secret = signing_config.webhook_secret.clone();
    let (app, _) = test_app(config);
    let unsigned = Request::builder()
        .method("POST")
        .uri(WEBHOOK_PATH)
        .body(Body::from(payload))?;
    let response = app.oneshot(unsigned).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(read_text(response).await?, "Unauthorized");

    assert_eq!(store.purchase_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn non_string_event_names_are_acknowledged_without_a_write() -> Result<()> {
    let config = test_config();
    let (app, store) = test_app(config.clone());

    for meta in [
        json!({"event_name": 42}),
        json!({"event_name": {"name": "order_created"}}),
        json!({"event_name": ["order_created"]}),
        json!("order_created"),
    ] {
        let payload = json!({
            "meta": meta,
            "data": {"id": "9", "attributes": {"user_email": "jane.doe@example.com"}}
        })
        .to_string();
        let response = app
            .clone()
            .oneshot(signed_request(&config, &payload)?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK, "{payload}");
        assert_eq!(read_text(response).await?, "OK");
    }

    assert_eq!(store.purchase_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn custom_webhook_path_is_routed() -> Result<()> {
    let mut config = test_config();
    config.webhook_path = "/hooks/lemon".to_string();
    let (app, store) = test_app(config.clone());

    let payload = order_created(Some("custom@path.io"));
    let mut request = signed_request(&config, &payload)?;
    *request.uri_mut() = "/hooks/lemon".parse()?;
    let response = app.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(store.find_purchase("custom@path.io").await.is_some());

    let default_path = app.oneshot(signed_request(&config, &payload)?).await?;
    assert_eq!(default_path.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn health_and_readiness_report_secret_configuration() -> Result<()> {
    let (app, _) = test_app(test_config());

    let health = app
        .clone()
        .oneshot(Request::builder().uri("/healthz").body(Body::empty())?)
        .await?;
    assert_eq!(health.status(), StatusCode::OK);
    assert!(health.headers().contains_key("x-request-id"));
    let health_body = read_json(health).await?;
    assert_eq!(health_body["status"], json!("ok"));
    assert_eq!(health_body["service"], json!("barber-blueprint-purchase-webhook"));
    assert_eq!(health_body["purchase_store"], json!("file"));

    let ready = app
        .oneshot(Request::builder().uri("/readyz").body(Body::empty())?)
        .await?;
    assert_eq!(ready.status(), StatusCode::OK);
    assert_eq!(read_json(ready).await?["status"], json!("ready"));

    let mut unconfigured = test_config();
    unconfigured.webhook_secret = Some(String::new());
    let (app, _) = test_app(unconfigured);
    let not_ready = app
        .oneshot(Request::builder().uri("/readyz").body(Body::empty())?)
        .await?;
    assert_eq!(not_ready.status(), StatusCode::SERVICE_UNAVAILABLE);
    let not_ready_body = read_json(not_ready).await?;
    assert_eq!(not_ready_body["status"], json!("not_ready"));
    assert_eq!(not_ready_body["webhook_secret_configured"], json!(false));
    Ok(())
}

#[tokio::test]
async fn inbound_request_id_is_propagated() -> Result<()> {
    let config = test_config();
    let (app, _) = test_app(config.clone());

    let mut request = signed_request(&config, &order_created(Some("rid@buyer.com")))?;
    request
        .headers_mut()
        .insert("x-request-id", "req-purchase-1".parse()?);
    let response = app.oneshot(request).await?;

    assert_eq!(
        response
            .headers()
            .get("x-request-id")
            .and_then(|value| value.to_str().ok()),
        Some("req-purchase-1")
    );
    Ok(())
}
