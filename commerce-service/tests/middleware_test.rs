//! Router-level tests for the request-gating chain. These never reach
//! MongoDB: every request is rejected (or answered) by middleware or input
//! validation first.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::engine::{general_purpose::URL_SAFE_NO_PAD, Engine};
use common::{browser_request, TestApp};
use http_body_util::BodyExt;
use tower::ServiceExt;

fn forged_token(alg: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(format!(r#"{{"alg":"{}","typ":"JWT"}}"#, alg).as_bytes());
    let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"alice","role":"admin"}"#);
    format!("{}.{}.", header, payload)
}

#[tokio::test]
async fn alg_none_bearer_is_rejected() {
    let app = TestApp::spawn(false).await;

    let mut req = browser_request("GET", "/api/v1/auth/me", None);
    req.headers_mut().insert(
        "authorization",
        format!("Bearer {}", forged_token("none")).parse().unwrap(),
    );

    let res = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn hmac_confusion_bearer_is_rejected() {
    let app = TestApp::spawn(false).await;

    for alg in ["HS256", "HS384", "HS512", "RS384"] {
        let mut req = browser_request("GET", "/api/v1/auth/me", None);
        req.headers_mut().insert(
            "authorization",
            format!("Bearer {}", forged_token(alg)).parse().unwrap(),
        );
        let res = app.router.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "alg {}", alg);
    }
}

#[tokio::test]
async fn missing_bearer_is_rejected() {
    let app = TestApp::spawn(false).await;
    let res = app
        .router
        .clone()
        .oneshot(browser_request("GET", "/api/v1/auth/me", None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn prototype_pollution_body_is_blocked() {
    let app = TestApp::spawn(false).await;

    let res = app
        .router
        .clone()
        .oneshot(browser_request(
            "POST",
            "/api/v1/auth/login",
            Some(r#"{"email":"a@b.c","password":"x","__proto__":{"role":"admin"}}"#),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let body = res.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "error");
}

#[tokio::test]
async fn pollution_keys_in_query_are_blocked() {
    let app = TestApp::spawn(false).await;

    let res = app
        .router
        .clone()
        .oneshot(browser_request(
            "GET",
            "/api/v1/auth/me?__proto__=admin",
            None,
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn webhook_without_signature_is_rejected() {
    let app = TestApp::spawn(false).await;

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/payments/webhook")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"type":"payment_intent.succeeded"}"#))
        .unwrap();

    let res = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn webhook_with_invalid_signature_is_rejected_before_branching() {
    let app = TestApp::spawn(false).await;

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/payments/webhook")
        .header("content-type", "application/json")
        .header("stripe-signature", "t=1,v1=deadbeef")
        .body(Body::from(r#"{"type":"payment_intent.succeeded"}"#))
        .unwrap();

    let res = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn security_headers_are_attached() {
    let app = TestApp::spawn(false).await;

    let res = app
        .router
        .clone()
        .oneshot(browser_request("GET", "/metrics", None))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let headers = res.headers();
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert_eq!(
        headers.get("content-security-policy").unwrap(),
        "default-src 'self'; frame-ancestors 'none'"
    );
}

#[tokio::test]
async fn auth_rate_limit_rejects_sixth_request_with_retry_after() {
    let app = TestApp::spawn(false).await;
    // Parseable but invalid body: each attempt fails validation in the
    // handler layer, after the limiter has counted it.
    let body = r#"{"email":"not-an-email","password":"x"}"#;

    for i in 1..=5 {
        let res = app
            .router
            .clone()
            .oneshot(browser_request("POST", "/api/v1/auth/login", Some(body)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "request {}", i);
        assert!(res.headers().contains_key("x-ratelimit-limit"));
        assert!(res.headers().contains_key("x-ratelimit-remaining"));
        assert!(res.headers().contains_key("x-ratelimit-reset"));
    }

    let res = app
        .router
        .clone()
        .oneshot(browser_request("POST", "/api/v1/auth/login", Some(body)))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    // Rejected by the auth limiter: its cap and exhaustion are reported.
    assert_eq!(res.headers().get("x-ratelimit-limit").unwrap(), "5");
    assert_eq!(res.headers().get("x-ratelimit-remaining").unwrap(), "0");

    let retry_after: u64 = res
        .headers()
        .get("retry-after")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 60);

    let body = res.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(json["retryAfter"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn high_confidence_automation_is_blocked_on_auth_paths() {
    let app = TestApp::spawn(false).await;

    // curl UA + generic accept + connection close and nothing else scores
    // at the blocking threshold.
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/auth/login")
        .header("user-agent", "curl/8.4.0")
        .header("accept", "*/*")
        .header("connection", "close")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"email":"a@b.c","password":"x"}"#))
        .unwrap();

    let res = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn production_origin_gate_rejects_unlisted_and_missing_origins() {
    let app = TestApp::spawn(true).await;
    let body = r#"{"email":"not-an-email","password":"x"}"#;

    // Unlisted origin.
    let mut req = browser_request("POST", "/api/v1/auth/login", Some(body));
    req.headers_mut()
        .insert("origin", "https://evil.example.com".parse().unwrap());
    let res = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    // No origin at all on a state-changing request.
    let res = app
        .router
        .clone()
        .oneshot(browser_request("POST", "/api/v1/auth/login", Some(body)))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    // Allowed origin proceeds past the gate to input validation.
    let mut req = browser_request("POST", "/api/v1/auth/login", Some(body));
    req.headers_mut()
        .insert("origin", "https://shop.example.com".parse().unwrap());
    let res = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn production_rejects_urlencoded_api_bodies() {
    let app = TestApp::spawn(true).await;

    let mut req = browser_request("POST", "/api/v1/auth/login", None);
    req.headers_mut().insert(
        "content-type",
        "application/x-www-form-urlencoded".parse().unwrap(),
    );
    req.headers_mut()
        .insert("origin", "https://shop.example.com".parse().unwrap());
    *req.body_mut() = Body::from("email=a%40b.c&password=x");

    let res = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn create_intent_requires_authentication() {
    let app = TestApp::spawn(false).await;

    let res = app
        .router
        .clone()
        .oneshot(browser_request(
            "POST",
            "/api/v1/payments/create-intent",
            Some(r#"{"items":[{"productId":"507f1f77bcf86cd799439011","quantity":1}]}"#),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn refresh_without_cookie_is_unauthorized() {
    let app = TestApp::spawn(false).await;

    let res = app
        .router
        .clone()
        .oneshot(browser_request("POST", "/api/v1/auth/refresh", Some("{}")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}
