//! End-to-end auth flows against a live MongoDB.
//!
//! These are `#[ignore]`d: run with `cargo test -- --ignored` and a local
//! MongoDB at localhost:27017.

mod common;

use common::TestApp;
use mongodb::bson::{doc, oid::ObjectId};

use commerce_service::services::fingerprint::ClientSignals;
use commerce_service::services::auth::{DeviceInfo, LoginOutcome};
use commerce_service::services::ServiceError;

fn unique_email(prefix: &str) -> String {
    format!("{}-{}@example.com", prefix, ObjectId::new().to_hex())
}

fn browser_signals() -> ClientSignals {
    ClientSignals {
        ip: "203.0.113.10".to_string(),
        tls_info: None,
        user_agent: Some("Mozilla/5.0 (X11; Linux x86_64) Chrome/120.0".to_string()),
        accept: Some("application/json".to_string()),
        accept_language: Some("en-US,en;q=0.9".to_string()),
        accept_encoding: Some("gzip, deflate, br".to_string()),
        sec_fetch_site: Some("same-origin".to_string()),
        sec_fetch_mode: Some("cors".to_string()),
        sec_fetch_dest: Some("empty".to_string()),
        connection: None,
    }
}

async fn register_and_verify(app: &TestApp, email: &str, password: &str) {
    let signals = browser_signals();
    app.state
        .auth
        .register(email, password, None, &signals)
        .await
        .expect("registration should succeed");

    let user = app
        .state
        .db
        .find_user_by_email(email)
        .await
        .unwrap()
        .expect("user should exist");
    let token = user
        .email_verification_token
        .expect("verification token should be set");

    app.state
        .auth
        .verify_email(&token)
        .await
        .expect("verification should succeed");
}

#[tokio::test]
#[ignore] // Requires running MongoDB
async fn rotate_once_second_rotation_fails_and_family_is_revoked() {
    let app = TestApp::spawn(false).await;
    app.state.db.ensure_indexes().await.unwrap();

    let email = unique_email("alice");
    let password = "Passw0rd!Secret";
    register_and_verify(&app, &email, password).await;

    let signals = browser_signals();
    let outcome = app
        .state
        .auth
        .login(&email, password, DeviceInfo::default(), &signals)
        .await
        .unwrap();
    let LoginOutcome::Success(first) = outcome else {
        panic!("expected a direct login success");
    };
    let r1 = first.refresh_token.clone();

    // First rotation succeeds and yields different tokens.
    let second = app
        .state
        .auth
        .refresh(&r1, DeviceInfo::default(), &signals)
        .await
        .expect("first rotation should succeed");
    assert_ne!(second.refresh_token, r1);
    assert!(!second.access_token.is_empty());

    // Replaying R1 fails, and its family is revoked end to end.
    let err = app
        .state
        .auth
        .refresh(&r1, DeviceInfo::default(), &signals)
        .await
        .expect_err("second rotation of the same token must fail");
    assert!(matches!(
        err,
        ServiceError::InvalidToken | ServiceError::RefreshInProgress
    ));

    let user = app.state.db.find_user_by_email(&email).await.unwrap().unwrap();
    let active = app.state.auth.sessions().list_active(user.id).await.unwrap();
    // Only the rotated-to session can remain live.
    assert!(active.len() <= 1);
    for session in active {
        assert!(!session.revoked);
    }
}

#[tokio::test]
#[ignore] // Requires running MongoDB
async fn email_verification_token_is_single_use() {
    let app = TestApp::spawn(false).await;

    let email = unique_email("carol");
    let signals = browser_signals();
    app.state
        .auth
        .register(&email, "Passw0rd!Secret", None, &signals)
        .await
        .unwrap();

    let user = app.state.db.find_user_by_email(&email).await.unwrap().unwrap();
    let token = user.email_verification_token.unwrap();

    app.state.auth.verify_email(&token).await.unwrap();
    let err = app.state.auth.verify_email(&token).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidToken));
}

#[tokio::test]
#[ignore] // Requires running MongoDB; slow (progressive delays)
async fn five_failures_block_login_even_with_the_correct_password() {
    let app = TestApp::spawn(false).await;

    let email = unique_email("bob");
    let password = "Passw0rd!Secret";
    register_and_verify(&app, &email, password).await;

    let signals = browser_signals();
    for _ in 0..5 {
        let err = app
            .state
            .auth
            .login(&email, "Wrong-Passw0rd!", DeviceInfo::default(), &signals)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::InvalidCredentials | ServiceError::LoginBlocked { .. }
        ));
    }

    // Correct password inside the block window is still rejected.
    let err = app
        .state
        .auth
        .login(&email, password, DeviceInfo::default(), &signals)
        .await
        .unwrap_err();
    let ServiceError::LoginBlocked { retry_after } = err else {
        panic!("expected the tracker block, got {:?}", err);
    };
    assert!(retry_after > 1500 && retry_after <= 1800);
}

#[tokio::test]
#[ignore] // Requires running MongoDB
async fn password_reset_bumps_token_version_and_revokes_sessions() {
    let app = TestApp::spawn(false).await;
    app.state.db.ensure_indexes().await.unwrap();

    let email = unique_email("dave");
    let password = "Passw0rd!Secret";
    register_and_verify(&app, &email, password).await;

    let signals = browser_signals();
    let LoginOutcome::Success(_) = app
        .state
        .auth
        .login(&email, password, DeviceInfo::default(), &signals)
        .await
        .unwrap()
    else {
        panic!("expected login success");
    };

    app.state.auth.request_password_reset(&email).await.unwrap();
    let user = app.state.db.find_user_by_email(&email).await.unwrap().unwrap();
    let reset_token = user.password_reset_token.expect("reset token should be set");

    app.state
        .auth
        .reset_password(&reset_token, "New-Passw0rd!42", &signals)
        .await
        .unwrap();

    let user = app.state.db.find_user_by_email(&email).await.unwrap().unwrap();
    assert_eq!(user.token_version, 1);
    assert!(app
        .state
        .auth
        .sessions()
        .list_active(user.id)
        .await
        .unwrap()
        .is_empty());

    // The old password is rejected, the new one works.
    assert!(app
        .state
        .auth
        .login(&email, password, DeviceInfo::default(), &signals)
        .await
        .is_err());
    assert!(matches!(
        app.state
            .auth
            .login(&email, "New-Passw0rd!42", DeviceInfo::default(), &signals)
            .await
            .unwrap(),
        LoginOutcome::Success(_)
    ));

    // Reusing a recent password is rejected.
    app.state.auth.request_password_reset(&email).await.unwrap();
    let user = app.state.db.find_user_by_email(&email).await.unwrap().unwrap();
    let reset_token = user.password_reset_token.unwrap();
    let err = app
        .state
        .auth
        .reset_password(&reset_token, password, &signals)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PasswordReuse));
}

#[tokio::test]
#[ignore] // Requires running MongoDB
async fn unverified_login_requires_email_verification() {
    let app = TestApp::spawn(false).await;

    let email = unique_email("eve");
    let signals = browser_signals();
    app.state
        .auth
        .register(&email, "Passw0rd!Secret", None, &signals)
        .await
        .unwrap();

    let outcome = app
        .state
        .auth
        .login(&email, "Passw0rd!Secret", DeviceInfo::default(), &signals)
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        LoginOutcome::EmailVerificationRequired { .. }
    ));
}

#[tokio::test]
#[ignore] // Requires running MongoDB
async fn duplicate_registration_is_rejected_without_disclosure() {
    let app = TestApp::spawn(false).await;

    let email = unique_email("frank");
    let signals = browser_signals();
    app.state
        .auth
        .register(&email, "Passw0rd!Secret", None, &signals)
        .await
        .unwrap();

    let err = app
        .state
        .auth
        .register(&email, "Other-Passw0rd!1", None, &signals)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::EmailExists));

    // Enumeration-safe flows return success either way.
    app.state
        .auth
        .request_password_reset(&unique_email("nobody"))
        .await
        .unwrap();
    app.state
        .auth
        .resend_verification(&unique_email("nobody"))
        .await
        .unwrap();
}
