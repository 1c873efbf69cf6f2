//! HTTP API Tests
//!
//! Drive the router end to end with `tower::ServiceExt::oneshot`.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Duration;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use partner_trust_core::{CertificateBuilder, CertificateEntry, CertificateRole, KeyPair};
use partner_trust_plane::{create_router, AppState, MemoryEventSink, PlaneConfig};

// =============================================================================
// Test Helpers
// =============================================================================

fn app() -> Router {
    let state = AppState::from_config(PlaneConfig::default(), Arc::new(MemoryEventSink::new()));
    create_router(Arc::new(state))
}

#[derive(Clone, Copy)]
enum As<'a> {
    Partner(&'a str),
    Manager,
    Admin,
    Anonymous,
}

fn request(method: &str, uri: &str, caller: As<'_>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    builder = match caller {
        As::Partner(id) => builder
            .header("x-caller-id", id)
            .header("x-caller-role", "partner")
            .header("x-partner-id", id),
        As::Manager => builder
            .header("x-caller-id", "pm-1")
            .header("x-caller-role", "partner_manager"),
        As::Admin => builder
            .header("x-caller-id", "admin")
            .header("x-caller-role", "admin"),
        As::Anonymous => builder,
    };
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn root_and_leaf() -> (CertificateEntry, CertificateEntry) {
    let root_key = KeyPair::generate();
    let leaf_key = KeyPair::generate();
    let root = CertificateBuilder::new()
        .subject("CN=Root")
        .role(CertificateRole::Root)
        .partner_domain("AUTH")
        .valid_for(Duration::days(365))
        .self_signed(&root_key)
        .unwrap();
    let leaf = CertificateBuilder::new()
        .subject("CN=P1")
        .role(CertificateRole::PartnerLeaf)
        .partner_domain("AUTH")
        .public_key(&leaf_key.public_key())
        .valid_for(Duration::days(30))
        .issued_by("CN=Root", &root_key)
        .unwrap();
    (root, leaf)
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn health_returns_ok() {
    let app = app();
    let (status, json) = send(&app, request("GET", "/health", As::Anonymous, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn ready_reports_domain_counts() {
    let app = app();
    let (root, _) = root_and_leaf();
    let upload = json!({ "certificate": root.to_pem().unwrap() });
    send(&app, request("POST", "/v1/certificates/ca", As::Manager, Some(upload))).await;

    let (status, json) = send(&app, request("GET", "/ready", As::Anonymous, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["certificate_count"], 1);
    assert_eq!(json["domains"]["AUTH"]["active"], 1);
    assert_eq!(json["max_chain_depth"], 8);
}

// =============================================================================
// Certificates
// =============================================================================

#[tokio::test]
async fn certificate_upload_and_download() {
    let app = app();
    let (root, leaf) = root_and_leaf();

    let (status, json) = send(
        &app,
        request(
            "POST",
            "/v1/certificates/ca",
            As::Manager,
            Some(json!({ "certificate": root.to_pem().unwrap(), "partner_domain": "AUTH" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["status"], "committed");
    assert_eq!(json["identity"]["serial_number"], root.serial_number.as_str());

    let (status, _) = send(
        &app,
        request(
            "POST",
            "/v1/certificates/partner",
            As::Partner("P1"),
            Some(json!({ "partner_id": "P1", "certificate": leaf.to_pem().unwrap() })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, json) = send(
        &app,
        request("GET", "/v1/partners/P1/certificate", As::Partner("P1"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["partner_id"], "P1");
    assert_eq!(json["subject_name"], "CN=P1");
    assert_eq!(json["certificate"], leaf.to_pem().unwrap());
}

#[tokio::test]
async fn duplicate_upload_conflicts() {
    let app = app();
    let (root, _) = root_and_leaf();
    let upload = json!({ "certificate": root.to_pem().unwrap() });

    let (status, _) = send(&app, request("POST", "/v1/certificates/ca", As::Manager, Some(upload.clone()))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, json) = send(&app, request("POST", "/v1/certificates/ca", As::Manager, Some(upload))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "DUPLICATE_CERTIFICATE");
    assert_eq!(json["details"]["identity"]["issuer_name"], "CN=Root");
}

#[tokio::test]
async fn unknown_issuer_is_unprocessable() {
    let app = app();
    let (_, leaf) = root_and_leaf();

    let (status, json) = send(
        &app,
        request(
            "POST",
            "/v1/certificates/partner",
            As::Partner("P1"),
            Some(json!({ "partner_id": "P1", "certificate": leaf.to_pem().unwrap() })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["code"], "UNKNOWN_ISSUER");
    assert_eq!(json["details"]["partner_domain"], "AUTH");
}

#[tokio::test]
async fn garbage_certificate_is_bad_request() {
    let app = app();
    let (status, json) = send(
        &app,
        request(
            "POST",
            "/v1/certificates/ca",
            As::Manager,
            Some(json!({ "certificate": "bm90IGEgY2VydGlmaWNhdGU=" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "MALFORMED_CERTIFICATE");
}

#[tokio::test]
async fn partner_cannot_upload_ca_or_revoke() {
    let app = app();
    let (root, _) = root_and_leaf();

    let (status, _) = send(
        &app,
        request(
            "POST",
            "/v1/certificates/ca",
            As::Partner("P1"),
            Some(json!({ "certificate": root.to_pem().unwrap() })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let revoke = json!({ "issuer_name": "CN=Root", "serial_number": root.serial_number, "reason": "x" });
    let (status, _) = send(&app, request("POST", "/v1/certificates/revoke", As::Manager, Some(revoke))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn revoke_then_lookup_shows_tombstone() {
    let app = app();
    let (root, _) = root_and_leaf();
    send(
        &app,
        request("POST", "/v1/certificates/ca", As::Manager, Some(json!({ "certificate": root.to_pem().unwrap() }))),
    )
    .await;

    let identity = json!({ "issuer_name": "CN=Root", "serial_number": root.serial_number });
    let mut revoke = identity.clone();
    revoke["reason"] = json!("compromised");

    let (status, json) = send(&app, request("POST", "/v1/certificates/revoke", As::Admin, Some(revoke))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["revocation"]["reason"], "compromised");

    let (status, json) = send(&app, request("POST", "/v1/certificates/lookup", As::Manager, Some(identity))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["revocation"]["reason"], "compromised");

    let missing = json!({ "issuer_name": "CN=Nobody", "serial_number": "00" });
    let (status, json) = send(&app, request("POST", "/v1/certificates/lookup", As::Manager, Some(missing))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "CERTIFICATE_NOT_FOUND");
}

#[tokio::test]
async fn missing_caller_headers_unauthorized() {
    let app = app();
    let (status, json) = send(
        &app,
        request("GET", "/v1/partners/P1/certificate", As::Anonymous, None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], "UNAUTHORIZED");
}

// =============================================================================
// API Keys
// =============================================================================

#[tokio::test]
async fn apikey_lifecycle_over_http() {
    let app = app();

    let (status, json) = send(
        &app,
        request(
            "POST",
            "/v1/partners/P1/apikey-requests",
            As::Partner("P1"),
            Some(json!({ "policy_id": "POL1", "use_case_description": "eKYC" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["state"], "Submitted");
    let id = json["request_id"].as_str().unwrap().to_string();

    let (status, json) = send(
        &app,
        request("POST", "/v1/partners/P1/apikey-requests", As::Partner("P1"), Some(json!({ "policy_id": "POL1" }))),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "DUPLICATE_REQUEST");
    assert_eq!(json["details"]["existing_request_id"], id.as_str());

    let (status, json) = send(
        &app,
        request("POST", &format!("/v1/apikey-requests/{}/approve", id), As::Manager, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "Approved");

    let (status, generated) = send(
        &app,
        request("POST", &format!("/v1/apikey-requests/{}/key", id), As::Partner("P1"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let api_key = generated["api_key"].as_str().unwrap().to_string();

    let (_, again) = send(
        &app,
        request("POST", &format!("/v1/apikey-requests/{}/key", id), As::Partner("P1"), None),
    )
    .await;
    assert_eq!(again["key_material_ref"], generated["key_material_ref"]);
    assert!(again.get("api_key").is_none());

    let (status, json) = send(
        &app,
        request("GET", &format!("/v1/partners/P1/apikey-requests/{}/key", id), As::Partner("P1"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["api_key"], api_key.as_str());

    let (status, json) = send(
        &app,
        request("GET", &format!("/v1/partners/P1/apikey-requests/{}/key", id), As::Partner("P2"), None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["code"], "NOT_AUTHORIZED");

    let (status, json) = send(&app, request("GET", "/v1/partners/P1/apikey-requests", As::Partner("P1"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 1);
    assert_eq!(json["requests"][0]["state"], "KeyGenerated");
}

#[tokio::test]
async fn invalid_transition_reports_state() {
    let app = app();
    let (_, json) = send(
        &app,
        request("POST", "/v1/partners/P1/apikey-requests", As::Partner("P1"), Some(json!({ "policy_id": "POL1" }))),
    )
    .await;
    let id = json["request_id"].as_str().unwrap().to_string();

    send(
        &app,
        request("POST", &format!("/v1/apikey-requests/{}/reject", id), As::Manager, Some(json!({ "reason": "no" }))),
    )
    .await;

    let (status, json) = send(
        &app,
        request("POST", &format!("/v1/apikey-requests/{}/approve", id), As::Manager, None),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "INVALID_STATE_TRANSITION");
    assert_eq!(json["details"]["state"], "Rejected");
    assert_eq!(json["details"]["event"], "approve");
}

#[tokio::test]
async fn partners_cannot_see_each_other() {
    let app = app();
    let (_, json) = send(
        &app,
        request("POST", "/v1/partners/P1/apikey-requests", As::Partner("P1"), Some(json!({ "policy_id": "POL1" }))),
    )
    .await;
    let id = json["request_id"].as_str().unwrap().to_string();

    let (status, _) = send(&app, request("GET", &format!("/v1/apikey-requests/{}", id), As::Partner("P2"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, request("GET", "/v1/partners/P1/apikey-requests", As::Partner("P2"), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        request("POST", "/v1/partners/P1/apikey-requests", As::Partner("P2"), Some(json!({ "policy_id": "POL2" }))),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, request("GET", &format!("/v1/apikey-requests/{}", id), As::Manager, None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unknown_request_not_found() {
    let app = app();
    let (status, json) = send(&app, request("GET", "/v1/apikey-requests/missing", As::Manager, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "REQUEST_NOT_FOUND");
    assert_eq!(json["details"]["request_id"], "missing");
}
