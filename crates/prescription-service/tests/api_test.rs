//! Integration tests for the Prescription Service API

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use ledger_client::MockLedger;
use prescription_service::{
    create_router, AnchorWorker, AnchorWorkerConfig, AppState, MemoryStorage, QrCodeGenerator,
    TokenIssuer,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt; // for `oneshot`

/// Helper to create a test app with in-memory storage and a mock ledger
fn create_test_app() -> (Router, AnchorWorker) {
    let storage = Arc::new(MemoryStorage::new());
    let ledger = Arc::new(MockLedger::new());

    let state = AppState::new(
        storage.clone(),
        ledger.clone(),
        TokenIssuer::new("test-secret", chrono::Duration::hours(1)),
        4,
        QrCodeGenerator::new("http://localhost:3000"),
    );
    let worker = AnchorWorker::new(AnchorWorkerConfig::default(), storage, ledger);

    (create_router(Arc::new(state)), worker)
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
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

/// Register and complete a profile, returning the token and user id
async fn sign_up(app: &Router, email: &str, profile: Value) -> (String, u64) {
    let (status, body) = send(
        app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({ "email": email, "password": "correct horse" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = send(
        app,
        "POST",
        "/api/auth/complete-profile",
        Some(&token),
        Some(profile),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    (
        body["token"].as_str().unwrap().to_string(),
        body["user"]["id"].as_u64().unwrap(),
    )
}

async fn pharmacy(app: &Router) -> (String, u64) {
    sign_up(
        app,
        "pharmacy@example.com",
        json!({ "name": "Dr. Lee", "role": "PHARMACY", "pharmacyName": "Corner Pharmacy" }),
    )
    .await
}

async fn consumer(app: &Router) -> (String, u64) {
    sign_up(
        app,
        "patient@example.com",
        json!({ "name": "Jane Doe", "role": "CONSUMER" }),
    )
    .await
}

fn amoxicillin() -> Value {
    json!({
        "medicineName": "Amoxicillin",
        "dosage": "500mg",
        "frequency": 3,
        "times": ["08:00", "14:00", "20:00"],
        "instructions": "Take after meals",
        "patientName": "Jane Doe"
    })
}

#[tokio::test]
async fn test_health_check() {
    let (app, _worker) = create_test_app();

    let (status, json) = send(&app, "GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "prescription-service");
}

#[tokio::test]
async fn test_ledger_balance() {
    let (app, _worker) = create_test_app();

    let (status, json) = send(&app, "GET", "/api/ledger/balance", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["balance"], 1.0);
    assert!(json["address"].as_str().is_some());
}

#[tokio::test]
async fn test_login_errors() {
    let (app, _worker) = create_test_app();
    pharmacy(&app).await;

    let (status, json) = send(
        &app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "email": "nobody@example.com", "password": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "User not found");

    let (status, json) = send(
        &app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "email": "pharmacy@example.com", "password": "wrong" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Invalid password");

    let (status, json) = send(
        &app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "email": "pharmacy@example.com", "password": "correct horse" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["user"]["role"], "PHARMACY");
}

#[tokio::test]
async fn test_me_requires_token() {
    let (app, _worker) = create_test_app();

    let (status, _) = send(&app, "GET", "/api/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, "GET", "/api/auth/me", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (token, id) = consumer(&app).await;
    let (status, json) = send(&app, "GET", "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["user"]["id"], id);
    assert_eq!(json["user"]["isProfileComplete"], true);
    assert!(json["user"].get("passwordHash").is_none());
}

#[tokio::test]
async fn test_create_get_and_verify_flow() {
    let (app, worker) = create_test_app();
    let (token, pharmacy_id) = pharmacy(&app).await;

    let (status, json) = send(
        &app,
        "POST",
        "/api/prescriptions",
        Some(&token),
        Some(amoxicillin()),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", json);

    let created = &json["prescription"];
    let uid = created["uid"].as_str().unwrap().to_string();
    assert_eq!(created["dataHash"].as_str().unwrap().len(), 64);
    assert!(created["qrCode"]
        .as_str()
        .unwrap()
        .starts_with("data:image/svg+xml;base64,"));
    assert!(created["codeUrl"].as_str().unwrap().ends_with(&uid));
    assert!(created["anchor"].get("txSignature").is_none());
    assert_eq!(created["pharmacyId"], pharmacy_id);

    let verify_uri = format!("/api/prescriptions/{}/verify", uid);
    let (status, json) = send(&app, "GET", &verify_uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json,
        json!({ "verified": false, "reason": "Not yet stored on chain" })
    );

    worker
        .process_next(Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();

    let (status, json) = send(&app, "GET", &verify_uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["verified"], true);
    assert_eq!(json["upToDate"], true);
    let signature = json["signature"].as_str().unwrap().to_string();

    let (status, json) = send(
        &app,
        "GET",
        &format!("/api/prescriptions/{}", uid),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["prescription"]["anchor"]["txSignature"], signature);
    assert_eq!(json["prescription"]["anchor"]["status"], "anchored");
    assert_eq!(json["prescription"]["pharmacy"]["name"], "Dr. Lee");

    let (status, json) = send(&app, "GET", "/api/prescriptions", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["prescriptions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_verify_unknown_uid() {
    let (app, _worker) = create_test_app();

    let (status, json) = send(&app, "GET", "/api/prescriptions/nope/verify", None, None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["verified"], false);
}

#[tokio::test]
async fn test_consumer_cannot_create_or_update() {
    let (app, _worker) = create_test_app();
    let (pharmacy_token, _) = pharmacy(&app).await;
    let (consumer_token, _) = consumer(&app).await;

    let (status, _) = send(
        &app,
        "POST",
        "/api/prescriptions",
        Some(&consumer_token),
        Some(amoxicillin()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, json) = send(
        &app,
        "POST",
        "/api/prescriptions",
        Some(&pharmacy_token),
        Some(amoxicillin()),
    )
    .await;
    let uid = json["prescription"]["uid"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        "PUT",
        &format!("/api/prescriptions/{}", uid),
        Some(&consumer_token),
        Some(json!({ "dosage": "1g" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, json) = send(
        &app,
        "GET",
        &format!("/api/prescriptions/{}", uid),
        None,
        None,
    )
    .await;
    assert_eq!(json["prescription"]["dosage"], "500mg");
}

#[tokio::test]
async fn test_update_changes_hash_and_keeps_uid() {
    let (app, _worker) = create_test_app();
    let (token, _) = pharmacy(&app).await;

    let (_, json) = send(
        &app,
        "POST",
        "/api/prescriptions",
        Some(&token),
        Some(amoxicillin()),
    )
    .await;
    let uid = json["prescription"]["uid"].as_str().unwrap().to_string();
    let hash = json["prescription"]["dataHash"].clone();

    let (status, json) = send(
        &app,
        "PUT",
        &format!("/api/prescriptions/{}", uid),
        Some(&token),
        Some(json!({ "dosage": "250mg" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["prescription"]["uid"], uid);
    assert_eq!(json["prescription"]["dosage"], "250mg");
    assert_eq!(json["prescription"]["medicineName"], "Amoxicillin");
    assert_ne!(json["prescription"]["dataHash"], hash);
}

#[tokio::test]
async fn test_invalid_schedule_rejected() {
    let (app, _worker) = create_test_app();
    let (token, _) = pharmacy(&app).await;

    let mut body = amoxicillin();
    body["times"] = json!(["25:99"]);

    let (status, json) = send(&app, "POST", "/api/prescriptions", Some(&token), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("HH:MM"));
}

#[tokio::test]
async fn test_prescription_for_patient_is_saved_to_their_account() {
    let (app, _worker) = create_test_app();
    let (pharmacy_token, _) = pharmacy(&app).await;
    let (consumer_token, consumer_id) = consumer(&app).await;

    let (status, json) = send(
        &app,
        "POST",
        &format!("/api/prescriptions/for-patient/{}", consumer_id),
        Some(&pharmacy_token),
        Some(amoxicillin()),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", json);
    let uid = json["prescription"]["uid"].as_str().unwrap().to_string();

    let (status, json) = send(
        &app,
        "GET",
        "/api/prescriptions/saved",
        Some(&consumer_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let saved = json["prescriptions"].as_array().unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0]["uid"], uid);
    assert_eq!(saved[0]["pharmacy"]["name"], "Dr. Lee");

    let (status, json) = send(
        &app,
        "GET",
        &format!("/api/auth/patient/{}", consumer_id),
        Some(&pharmacy_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["patient"]["name"], "Jane Doe");
    assert_eq!(json["patient"]["prescriptions"][0]["uid"], uid);
}

#[tokio::test]
async fn test_save_prescription_twice() {
    let (app, _worker) = create_test_app();
    let (pharmacy_token, _) = pharmacy(&app).await;
    let (consumer_token, _) = consumer(&app).await;

    let (_, json) = send(
        &app,
        "POST",
        "/api/prescriptions",
        Some(&pharmacy_token),
        Some(amoxicillin()),
    )
    .await;
    let uid = json["prescription"]["uid"].as_str().unwrap().to_string();

    for _ in 0..2 {
        let (status, json) = send(
            &app,
            "POST",
            "/api/prescriptions/save",
            Some(&consumer_token),
            Some(json!({ "prescriptionUid": uid })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "Prescription saved");
    }

    let (_, json) = send(
        &app,
        "GET",
        "/api/prescriptions/saved",
        Some(&consumer_token),
        None,
    )
    .await;
    assert_eq!(json["prescriptions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_manual_anchor_of_anchored_record_conflicts() {
    let (app, worker) = create_test_app();
    let (token, _) = pharmacy(&app).await;

    let (_, json) = send(
        &app,
        "POST",
        "/api/prescriptions",
        Some(&token),
        Some(amoxicillin()),
    )
    .await;
    let uid = json["prescription"]["uid"].as_str().unwrap().to_string();
    let anchor_uri = format!("/api/prescriptions/{}/anchor", uid);

    let (status, _) = send(&app, "POST", &anchor_uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    worker
        .process_next(Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();

    let (status, _) = send(&app, "POST", &anchor_uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}
