//! Auth orchestrator: registration, email verification, login and 2FA,
//! refresh rotation, logout, password lifecycle, session management.
//!
//! Every operation emits exactly one audit event on its terminal outcome.
//! Email dispatch is best-effort and never fails the operation.

use chrono::{Duration, Utc};
use mongodb::bson::{doc, oid::ObjectId, to_bson, DateTime};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::MongoDb;
use crate::services::anomaly::AnomalyService;
use crate::models::{
    user::{LOGIN_HISTORY_CAP, PASSWORD_HISTORY_CAP},
    AuditEventType, AuditMetadata, AuditResult, DeviceSnapshot, LoginHistoryEntry, SanitizedUser,
    TrustedDevice, User,
};
use crate::services::audit::{AuditEvent, AuditService};
use crate::services::email::EmailProvider;
use crate::services::error::ServiceError;
use crate::services::failed_login::FailedLoginTracker;
use crate::services::fingerprint::{ClientSignals, FingerprintService};
use crate::services::metrics;
use crate::services::session::{
    SessionStore, REASON_LOGOUT, REASON_PASSWORD_CHANGE, REASON_ROTATED,
};
use crate::services::token::TokenService;
use crate::services::two_factor::{generate_backup_codes, match_backup_code, TwoFactorService};
use crate::utils::password::{
    generate_random_token, hash_password, matches_history, validate_password_policy,
    verify_password,
};

const VERIFICATION_TOKEN_HOURS: i64 = 24;
const RESET_TOKEN_HOURS: i64 = 1;
const TEMP_TOKEN_MINUTES: i64 = 5;
const ACCOUNT_LOCK_MINUTES: i64 = 30;
const ACCOUNT_LOCK_THRESHOLD: i32 = 5;

/// Device identifiers supplied by the client at login.
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub device_id: Option<String>,
    pub device_name: Option<String>,
}

/// Issued token pair plus the sanitized user.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginSuccess {
    pub access_token: String,
    #[serde(skip)]
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: SanitizedUser,
}

/// Three-way login outcome.
#[derive(Debug)]
pub enum LoginOutcome {
    Success(Box<LoginSuccess>),
    EmailVerificationRequired { email: String },
    TwoFactorRequired { temp_token: String },
}

/// One-shot 2FA enrollment material.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorEnrollment {
    pub otpauth_url: String,
    pub backup_codes: Vec<String>,
}

#[derive(Clone)]
pub struct AuthService {
    db: MongoDb,
    tokens: TokenService,
    fingerprints: FingerprintService,
    sessions: SessionStore,
    audit: AuditService,
    anomaly: AnomalyService,
    email: Arc<dyn EmailProvider>,
    two_factor: TwoFactorService,
    failed_logins: FailedLoginTracker,
    base_url: String,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: MongoDb,
        tokens: TokenService,
        fingerprints: FingerprintService,
        sessions: SessionStore,
        audit: AuditService,
        anomaly: AnomalyService,
        email: Arc<dyn EmailProvider>,
        two_factor: TwoFactorService,
        failed_logins: FailedLoginTracker,
        base_url: String,
    ) -> Self {
        Self {
            db,
            tokens,
            fingerprints,
            sessions,
            audit,
            anomaly,
            email,
            two_factor,
            failed_logins,
            base_url,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    fn audit_meta(signals: &ClientSignals) -> AuditMetadata {
        AuditMetadata {
            ip: Some(signals.ip.clone()),
            user_agent: signals.user_agent.clone(),
            location: None,
            extra: None,
        }
    }

    // ---- Registration & email verification -------------------------------

    /// Register a new local-provider account. The role is always `user`;
    /// there is no way to pass one in.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: Option<String>,
        signals: &ClientSignals,
    ) -> Result<SanitizedUser, ServiceError> {
        validate_password_policy(password).map_err(ServiceError::PasswordPolicy)?;

        if self.db.find_user_by_email(email).await?.is_some() {
            return Err(ServiceError::EmailExists);
        }

        let password_hash = hash_password(password)?;
        let mut user = User::new(email.to_string(), password_hash, name);

        let token = generate_random_token();
        user.email_verification_token = Some(token.clone());
        user.email_verification_expires = Some(DateTime::from_chrono(
            Utc::now() + Duration::hours(VERIFICATION_TOKEN_HOURS),
        ));

        self.db.users().insert_one(&user, None).await.map_err(|err| {
            if crate::db::is_duplicate_key_error(&err) {
                ServiceError::EmailExists
            } else {
                ServiceError::Database(err)
            }
        })?;

        tracing::info!(user_id = %user.id, "User registered");

        self.audit.log(
            AuditEvent::new(
                AuditEventType::AuthRegister,
                "register",
                "auth",
                AuditResult::Success,
            )
            .user(user.id)
            .metadata(Self::audit_meta(signals)),
        );

        if let Err(err) = self
            .email
            .send_verification_email(&user.email, &token, &self.base_url)
            .await
        {
            tracing::warn!(error = %err, "Failed to send verification email");
        }

        Ok(user.sanitized())
    }

    /// Consume a verification token. Used tokens are cleared, so a second
    /// call with the same token fails.
    pub async fn verify_email(&self, token: &str) -> Result<(), ServiceError> {
        let user = self
            .db
            .find_user_by_verification_token(token)
            .await?
            .ok_or(ServiceError::InvalidToken)?;

        let expired = user
            .email_verification_expires
            .map(|e| e.to_chrono() <= Utc::now())
            .unwrap_or(true);
        if expired {
            return Err(ServiceError::InvalidToken);
        }

        self.db
            .users()
            .update_one(
                doc! { "_id": user.id },
                doc! { "$set": {
                    "is_email_verified": true,
                    "email_verification_token": null,
                    "email_verification_expires": null,
                    "updated_at": DateTime::now(),
                } },
                None,
            )
            .await?;

        self.audit.log(
            AuditEvent::new(
                AuditEventType::AuthEmailVerify,
                "verify_email",
                "auth",
                AuditResult::Success,
            )
            .user(user.id),
        );

        tracing::info!(user_id = %user.id, "Email verified");
        Ok(())
    }

    /// Re-issue a verification token. Enumeration-safe: succeeds silently
    /// whether or not the account exists.
    pub async fn resend_verification(&self, email: &str) -> Result<(), ServiceError> {
        let Some(user) = self.db.find_user_by_email(email).await? else {
            return Ok(());
        };
        if user.is_email_verified {
            return Ok(());
        }

        let token = generate_random_token();
        self.db
            .users()
            .update_one(
                doc! { "_id": user.id },
                doc! { "$set": {
                    "email_verification_token": &token,
                    "email_verification_expires": DateTime::from_chrono(
                        Utc::now() + Duration::hours(VERIFICATION_TOKEN_HOURS)
                    ),
                } },
                None,
            )
            .await?;

        if let Err(err) = self
            .email
            .send_verification_email(&user.email, &token, &self.base_url)
            .await
        {
            tracing::warn!(error = %err, "Failed to resend verification email");
        }
        Ok(())
    }

    // ---- Login -----------------------------------------------------------

    /// Password login with distributed failure tracking, progressive delay,
    /// and the three-way outcome.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        device: DeviceInfo,
        signals: &ClientSignals,
    ) -> Result<LoginOutcome, ServiceError> {
        let tracker_key = FailedLoginTracker::key_for(&signals.ip, Some(email));

        if let Some(retry_after) = self.failed_logins.check_blocked(&tracker_key).await {
            return Err(ServiceError::LoginBlocked { retry_after });
        }

        // Progressive delay keyed by prior failures; slows credential
        // stuffing without blocking unrelated requests.
        let delay = self.failed_logins.progressive_delay(&tracker_key).await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let user = match self.db.find_user_by_email(email).await? {
            Some(user) => user,
            None => {
                self.record_login_failure(&tracker_key, None, signals, "unknown_email")
                    .await;
                return Err(ServiceError::InvalidCredentials);
            }
        };

        if user.is_locked() {
            if let Err(err) = self
                .email
                .send_lockout_notice(&user.email, ACCOUNT_LOCK_MINUTES as u64)
                .await
            {
                tracing::warn!(error = %err, "Failed to send lockout notice");
            }
            return Err(ServiceError::AccountLocked);
        }

        if !verify_password(password, &user.password_hash) {
            self.record_login_failure(&tracker_key, Some(&user), signals, "invalid_password")
                .await;
            return Err(ServiceError::InvalidCredentials);
        }

        // Success path: clear counters before the remaining gates so a
        // verified-later login doesn't inherit stale failures.
        self.failed_logins.record_success(&tracker_key).await;
        self.db
            .users()
            .update_one(
                doc! { "_id": user.id },
                doc! { "$set": { "failed_login_attempts": 0, "account_locked_until": null } },
                None,
            )
            .await?;

        if !user.is_email_verified {
            return Ok(LoginOutcome::EmailVerificationRequired {
                email: user.email.clone(),
            });
        }

        if user.two_factor_enabled {
            let temp_token = generate_random_token();
            self.db
                .users()
                .update_one(
                    doc! { "_id": user.id },
                    doc! { "$set": {
                        "two_factor_temp_token": &temp_token,
                        "two_factor_temp_expires": DateTime::from_chrono(
                            Utc::now() + Duration::minutes(TEMP_TOKEN_MINUTES)
                        ),
                    } },
                    None,
                )
                .await?;
            return Ok(LoginOutcome::TwoFactorRequired { temp_token });
        }

        let success = self.finalize_login(user, device, signals).await?;
        Ok(LoginOutcome::Success(Box::new(success)))
    }

    /// Complete a 2FA challenge: TOTP first, then backup codes (consumed on
    /// match).
    pub async fn login_2fa(
        &self,
        temp_token: &str,
        code: &str,
        device: DeviceInfo,
        signals: &ClientSignals,
    ) -> Result<LoginSuccess, ServiceError> {
        let user = self
            .db
            .find_user_by_temp_token(temp_token)
            .await?
            .ok_or(ServiceError::InvalidToken)?;

        let expired = user
            .two_factor_temp_expires
            .map(|e| e.to_chrono() <= Utc::now())
            .unwrap_or(true);
        if expired {
            return Err(ServiceError::InvalidToken);
        }

        let secret = user
            .two_factor_secret
            .as_deref()
            .ok_or(ServiceError::InvalidToken)?;

        let mut verified = self
            .two_factor
            .verify_totp(secret, &user.email, code)
            .unwrap_or(false);

        if !verified {
            if let Some(idx) = match_backup_code(&user.two_factor_backup_codes, code) {
                verified = true;
                let mut remaining = user.two_factor_backup_codes.clone();
                remaining.remove(idx);
                self.db
                    .users()
                    .update_one(
                        doc! { "_id": user.id },
                        doc! { "$set": { "two_factor_backup_codes": remaining } },
                        None,
                    )
                    .await?;
                tracing::info!(user_id = %user.id, "Backup code consumed");
            }
        }

        if !verified {
            metrics::incr(&metrics::FAILED_LOGINS_TOTAL);
            self.audit.log(
                AuditEvent::new(
                    AuditEventType::SecurityFailedLogin,
                    "two_factor_failed",
                    "auth",
                    AuditResult::Failure,
                )
                .user(user.id)
                .metadata(Self::audit_meta(signals))
                .risk(60),
            );
            return Err(ServiceError::InvalidTwoFactorCode);
        }

        self.db
            .users()
            .update_one(
                doc! { "_id": user.id },
                doc! { "$set": {
                    "two_factor_temp_token": null,
                    "two_factor_temp_expires": null,
                } },
                None,
            )
            .await?;

        self.finalize_login(user, device, signals).await
    }

    /// Shared tail of every successful login: fingerprint binding, token
    /// minting, session creation, trusted-device handling, history, audit.
    async fn finalize_login(
        &self,
        user: User,
        device: DeviceInfo,
        signals: &ClientSignals,
    ) -> Result<LoginSuccess, ServiceError> {
        let fingerprint = self.fingerprints.enhanced_fingerprint(signals);
        let access_token = self.tokens.sign_access(&user, &fingerprint, &signals.ip)?;

        let family = Uuid::new_v4().to_string();
        let refresh_token = self.tokens.sign_refresh(&user, &family)?;

        let snapshot = DeviceSnapshot {
            device_id: device.device_id.clone(),
            device_name: device.device_name.clone(),
            user_agent: signals
                .user_agent
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            ip_address: signals.ip.clone(),
            location: None,
        };

        let expires_at = Utc::now() + Duration::seconds(self.tokens.refresh_expiry_secs());
        self.sessions
            .create(&refresh_token, user.id, snapshot, family, expires_at)
            .await?;

        // New-device alert and trusted-device registration.
        if let Some(device_id) = device.device_id.as_deref() {
            if !user.has_trusted_device(device_id) {
                let device_name = device
                    .device_name
                    .clone()
                    .or_else(|| signals.user_agent.clone())
                    .unwrap_or_else(|| "unknown device".to_string());
                if let Err(err) = self
                    .email
                    .send_new_device_alert(&user.email, &device_name, &signals.ip)
                    .await
                {
                    tracing::warn!(error = %err, "Failed to send new-device alert");
                }
                let trusted = TrustedDevice {
                    device_id: device_id.to_string(),
                    first_seen: DateTime::now(),
                };
                self.db
                    .users()
                    .update_one(
                        doc! { "_id": user.id },
                        doc! { "$push": { "trusted_devices": to_bson(&trusted).map_err(|e| ServiceError::Internal(e.into()))? } },
                        None,
                    )
                    .await?;
            }
        }

        self.push_login_history(
            user.id,
            LoginHistoryEntry {
                timestamp: DateTime::now(),
                ip: signals.ip.clone(),
                user_agent: signals
                    .user_agent
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
                success: true,
                reason: None,
                location: None,
            },
        )
        .await?;

        self.audit.log(
            AuditEvent::new(
                AuditEventType::AuthLogin,
                "login",
                "auth",
                AuditResult::Success,
            )
            .user(user.id)
            .metadata(Self::audit_meta(signals)),
        );

        tracing::info!(user_id = %user.id, "Login succeeded");

        Ok(LoginSuccess {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.tokens.access_expiry_secs(),
            user: user.sanitized(),
        })
    }

    async fn record_login_failure(
        &self,
        tracker_key: &str,
        user: Option<&User>,
        signals: &ClientSignals,
        reason: &str,
    ) {
        metrics::incr(&metrics::FAILED_LOGINS_TOTAL);
        let outcome = self.failed_logins.record_failure(tracker_key).await;

        if let Some(user) = user {
            let failed = user.failed_login_attempts + 1;
            let mut update = doc! { "$inc": { "failed_login_attempts": 1 } };
            if failed >= ACCOUNT_LOCK_THRESHOLD {
                update.insert(
                    "$set",
                    doc! { "account_locked_until": DateTime::from_chrono(
                        Utc::now() + Duration::minutes(ACCOUNT_LOCK_MINUTES)
                    ) },
                );
                self.audit.log(
                    AuditEvent::new(
                        AuditEventType::UserAccountLocked,
                        "account_locked",
                        "user",
                        AuditResult::Partial,
                    )
                    .user(user.id)
                    .metadata(Self::audit_meta(signals)),
                );
            }
            if let Err(err) = self
                .db
                .users()
                .update_one(doc! { "_id": user.id }, update, None)
                .await
            {
                tracing::warn!(error = %err, "Failed to update failure counter");
            }

            let _ = self
                .push_login_history(
                    user.id,
                    LoginHistoryEntry {
                        timestamp: DateTime::now(),
                        ip: signals.ip.clone(),
                        user_agent: signals
                            .user_agent
                            .clone()
                            .unwrap_or_else(|| "unknown".to_string()),
                        success: false,
                        reason: Some(reason.to_string()),
                        location: None,
                    },
                )
                .await;
        }

        let mut event = AuditEvent::new(
            AuditEventType::SecurityFailedLogin,
            "login",
            "auth",
            AuditResult::Failure,
        )
        .metadata(Self::audit_meta(signals))
        .risk(50);
        if let Some(user) = user {
            event = event.user(user.id);
        }
        if outcome.blocked {
            event = event.error("failure threshold reached; source blocked");
        }
        self.audit.log(event);

        // Pattern scoring over the audit trail; emits its own
        // suspicious-activity event and alert when thresholds are crossed.
        let anomaly = self.anomaly.clone();
        let user_id = user.map(|u| u.id);
        let ip = signals.ip.clone();
        tokio::spawn(async move {
            anomaly.check_failed_login_pattern(user_id, &ip).await;
        });
    }

    async fn push_login_history(
        &self,
        user_id: ObjectId,
        entry: LoginHistoryEntry,
    ) -> Result<(), ServiceError> {
        let entry = to_bson(&entry).map_err(|e| ServiceError::Internal(e.into()))?;
        self.db
            .users()
            .update_one(
                doc! { "_id": user_id },
                doc! { "$push": { "login_history": {
                    "$each": [entry],
                    "$slice": -(LOGIN_HISTORY_CAP as i64),
                } } },
                None,
            )
            .await?;
        Ok(())
    }

    // ---- Refresh rotation ------------------------------------------------

    /// Rotate a refresh token: verify, validate, revoke-then-insert with a
    /// fresh family. Exactly one of two concurrent rotations of the same
    /// token succeeds; the other surfaces `RefreshInProgress`.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        device: DeviceInfo,
        signals: &ClientSignals,
    ) -> Result<LoginSuccess, ServiceError> {
        let claims = self
            .tokens
            .verify_refresh(refresh_token)
            .map_err(|_| ServiceError::InvalidToken)?;

        let session = self.sessions.validate(refresh_token).await?;

        let user_id =
            ObjectId::parse_str(&claims.sub).map_err(|_| ServiceError::InvalidToken)?;
        if session.user_id != user_id {
            return Err(ServiceError::InvalidToken);
        }

        let user = self
            .db
            .find_user_by_id(&user_id)
            .await?
            .ok_or(ServiceError::InvalidToken)?;

        // A token-version bump (password change, global revocation)
        // invalidates every outstanding refresh token.
        if claims.token_version != user.token_version {
            let _ = self.sessions.revoke(refresh_token, REASON_ROTATED).await;
            return Err(ServiceError::InvalidToken);
        }

        // Revoke before insert. The filter only matches a live session, so
        // the loser of a concurrent rotation modifies nothing and stops
        // here without minting tokens.
        if !self.sessions.revoke(refresh_token, REASON_ROTATED).await? {
            return Err(ServiceError::RefreshInProgress);
        }

        let fingerprint = self.fingerprints.enhanced_fingerprint(signals);
        let access_token = self.tokens.sign_access(&user, &fingerprint, &signals.ip)?;

        // A fresh family per rotation keeps hashes unique under rapid
        // rotation; reuse detection follows the stored session's family.
        let family = Uuid::new_v4().to_string();
        let new_refresh = self.tokens.sign_refresh(&user, &family)?;

        let snapshot = DeviceSnapshot {
            device_id: device.device_id.or(session.device.device_id),
            device_name: device.device_name.or(session.device.device_name),
            user_agent: signals
                .user_agent
                .clone()
                .unwrap_or_else(|| session.device.user_agent.clone()),
            ip_address: signals.ip.clone(),
            location: session.device.location,
        };

        let expires_at = Utc::now() + Duration::seconds(self.tokens.refresh_expiry_secs());
        self.sessions
            .create(&new_refresh, user.id, snapshot, family, expires_at)
            .await?;

        tracing::debug!(user_id = %user.id, "Refresh token rotated");

        Ok(LoginSuccess {
            access_token,
            refresh_token: new_refresh,
            token_type: "Bearer".to_string(),
            expires_in: self.tokens.access_expiry_secs(),
            user: user.sanitized(),
        })
    }

    // ---- Logout ----------------------------------------------------------

    pub async fn logout(
        &self,
        user_id: ObjectId,
        refresh_token: Option<&str>,
        signals: &ClientSignals,
    ) -> Result<(), ServiceError> {
        if let Some(token) = refresh_token {
            let _ = self.sessions.revoke(token, REASON_LOGOUT).await?;
        }

        self.audit.log(
            AuditEvent::new(
                AuditEventType::AuthLogout,
                "logout",
                "auth",
                AuditResult::Success,
            )
            .user(user_id)
            .metadata(Self::audit_meta(signals)),
        );

        tracing::info!(user_id = %user_id, "User logged out");
        Ok(())
    }

    pub async fn logout_all(
        &self,
        user_id: ObjectId,
        signals: &ClientSignals,
    ) -> Result<u64, ServiceError> {
        let revoked = self.sessions.revoke_all(user_id, REASON_LOGOUT).await?;

        self.audit.log(
            AuditEvent::new(
                AuditEventType::AuthSessionRevoke,
                "logout_all",
                "auth",
                AuditResult::Success,
            )
            .user(user_id)
            .metadata(Self::audit_meta(signals))
            .extra(doc! { "revoked": revoked as i64 }),
        );

        Ok(revoked)
    }

    // ---- Password lifecycle ----------------------------------------------

    /// Enumeration-safe reset request: the caller always gets the same
    /// success, and only local-provider accounts get an email.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), ServiceError> {
        let Some(user) = self.db.find_user_by_email(email).await? else {
            return Ok(());
        };
        if user.provider != crate::models::AuthProvider::Local {
            return Ok(());
        }

        let token = generate_random_token();
        self.db
            .users()
            .update_one(
                doc! { "_id": user.id },
                doc! { "$set": {
                    "password_reset_token": &token,
                    "password_reset_expires": DateTime::from_chrono(
                        Utc::now() + Duration::hours(RESET_TOKEN_HOURS)
                    ),
                } },
                None,
            )
            .await?;

        if let Err(err) = self
            .email
            .send_password_reset_email(&user.email, &token, &self.base_url)
            .await
        {
            tracing::warn!(error = %err, "Failed to send password reset email");
        }

        tracing::info!(user_id = %user.id, "Password reset requested");
        Ok(())
    }

    pub async fn validate_reset_token(&self, token: &str) -> Result<(), ServiceError> {
        let user = self
            .db
            .find_user_by_reset_token(token)
            .await?
            .ok_or(ServiceError::InvalidToken)?;

        let expired = user
            .password_reset_expires
            .map(|e| e.to_chrono() <= Utc::now())
            .unwrap_or(true);
        if expired {
            return Err(ServiceError::InvalidToken);
        }
        Ok(())
    }

    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
        signals: &ClientSignals,
    ) -> Result<(), ServiceError> {
        let user = self
            .db
            .find_user_by_reset_token(token)
            .await?
            .ok_or(ServiceError::InvalidToken)?;

        let expired = user
            .password_reset_expires
            .map(|e| e.to_chrono() <= Utc::now())
            .unwrap_or(true);
        if expired {
            return Err(ServiceError::InvalidToken);
        }

        self.apply_password_change(&user, new_password, "password_reset", signals)
            .await?;

        // Reset token is single-use; clear alongside the change.
        self.db
            .users()
            .update_one(
                doc! { "_id": user.id },
                doc! { "$set": {
                    "password_reset_token": null,
                    "password_reset_expires": null,
                } },
                None,
            )
            .await?;

        Ok(())
    }

    pub async fn change_password(
        &self,
        user_id: ObjectId,
        current_password: &str,
        new_password: &str,
        signals: &ClientSignals,
    ) -> Result<(), ServiceError> {
        let user = self
            .db
            .find_user_by_id(&user_id)
            .await?
            .ok_or(ServiceError::UserNotFound)?;

        if !verify_password(current_password, &user.password_hash) {
            return Err(ServiceError::InvalidCredentials);
        }

        self.apply_password_change(&user, new_password, "password_change", signals)
            .await
    }

    /// Common policy for reset and change: history reuse rejection, history
    /// cap, token-version bump, global session revocation, notice email.
    async fn apply_password_change(
        &self,
        user: &User,
        new_password: &str,
        action: &str,
        signals: &ClientSignals,
    ) -> Result<(), ServiceError> {
        validate_password_policy(new_password).map_err(ServiceError::PasswordPolicy)?;

        if verify_password(new_password, &user.password_hash)
            || matches_history(new_password, &user.password_history)
        {
            return Err(ServiceError::PasswordReuse);
        }

        let new_hash = hash_password(new_password)?;

        let mut history = user.password_history.clone();
        history.insert(0, user.password_hash.clone());
        history.truncate(PASSWORD_HISTORY_CAP);

        self.db
            .users()
            .update_one(
                doc! { "_id": user.id },
                doc! {
                    "$set": {
                        "password_hash": &new_hash,
                        "password_history": &history,
                        "last_password_change": DateTime::now(),
                        "updated_at": DateTime::now(),
                    },
                    "$inc": { "token_version": 1 },
                },
                None,
            )
            .await?;

        // Every outstanding session dies with the old password.
        self.sessions
            .revoke_all(user.id, REASON_PASSWORD_CHANGE)
            .await?;

        self.audit.log(
            AuditEvent::new(
                AuditEventType::AuthPasswordReset,
                action,
                "auth",
                AuditResult::Success,
            )
            .user(user.id)
            .metadata(Self::audit_meta(signals)),
        );

        if let Err(err) = self.email.send_password_changed_email(&user.email).await {
            tracing::warn!(error = %err, "Failed to send password-changed email");
        }

        tracing::info!(user_id = %user.id, action, "Password updated");
        Ok(())
    }

    // ---- Two-factor management -------------------------------------------

    /// Begin 2FA enrollment. The secret is stored encrypted immediately but
    /// `two_factor_enabled` stays false until a TOTP proof arrives. The
    /// provisioning URI and backup codes leave the server exactly once.
    pub async fn enable_2fa(&self, user_id: ObjectId) -> Result<TwoFactorEnrollment, ServiceError> {
        let user = self
            .db
            .find_user_by_id(&user_id)
            .await?
            .ok_or(ServiceError::UserNotFound)?;

        if user.two_factor_enabled {
            return Err(ServiceError::Validation(
                "Two-factor authentication is already enabled".to_string(),
            ));
        }

        let setup = self.two_factor.generate_setup(&user.email)?;

        self.db
            .users()
            .update_one(
                doc! { "_id": user.id },
                doc! { "$set": {
                    "two_factor_secret": &setup.encrypted_secret,
                    "two_factor_backup_codes": &setup.backup_code_hashes,
                    "two_factor_enabled": false,
                } },
                None,
            )
            .await?;

        Ok(TwoFactorEnrollment {
            otpauth_url: setup.otpauth_url,
            backup_codes: setup.backup_codes,
        })
    }

    /// Commit enrollment after a successful TOTP verification.
    pub async fn verify_2fa_setup(
        &self,
        user_id: ObjectId,
        code: &str,
        signals: &ClientSignals,
    ) -> Result<(), ServiceError> {
        let user = self
            .db
            .find_user_by_id(&user_id)
            .await?
            .ok_or(ServiceError::UserNotFound)?;

        let secret = user
            .two_factor_secret
            .as_deref()
            .ok_or_else(|| ServiceError::Validation("Two-factor setup not started".to_string()))?;

        if !self
            .two_factor
            .verify_totp(secret, &user.email, code)
            .unwrap_or(false)
        {
            return Err(ServiceError::InvalidTwoFactorCode);
        }

        self.db
            .users()
            .update_one(
                doc! { "_id": user.id },
                doc! { "$set": { "two_factor_enabled": true } },
                None,
            )
            .await?;

        self.audit.log(
            AuditEvent::new(
                AuditEventType::Auth2faEnable,
                "enable_2fa",
                "auth",
                AuditResult::Success,
            )
            .user(user.id)
            .metadata(Self::audit_meta(signals)),
        );

        tracing::info!(user_id = %user.id, "Two-factor authentication enabled");
        Ok(())
    }

    /// Disabling requires both the current password and a valid code (TOTP
    /// or backup).
    pub async fn disable_2fa(
        &self,
        user_id: ObjectId,
        password: &str,
        code: &str,
        signals: &ClientSignals,
    ) -> Result<(), ServiceError> {
        let user = self
            .db
            .find_user_by_id(&user_id)
            .await?
            .ok_or(ServiceError::UserNotFound)?;

        if !user.two_factor_enabled {
            return Err(ServiceError::Validation(
                "Two-factor authentication is not enabled".to_string(),
            ));
        }

        if !verify_password(password, &user.password_hash) {
            return Err(ServiceError::InvalidCredentials);
        }

        let secret = user
            .two_factor_secret
            .as_deref()
            .ok_or(ServiceError::InvalidTwoFactorCode)?;
        let totp_ok = self
            .two_factor
            .verify_totp(secret, &user.email, code)
            .unwrap_or(false);
        let backup_ok =
            !totp_ok && match_backup_code(&user.two_factor_backup_codes, code).is_some();
        if !totp_ok && !backup_ok {
            return Err(ServiceError::InvalidTwoFactorCode);
        }

        self.db
            .users()
            .update_one(
                doc! { "_id": user.id },
                doc! { "$set": {
                    "two_factor_enabled": false,
                    "two_factor_secret": null,
                    "two_factor_backup_codes": Vec::<String>::new(),
                    "two_factor_temp_token": null,
                    "two_factor_temp_expires": null,
                } },
                None,
            )
            .await?;

        self.audit.log(
            AuditEvent::new(
                AuditEventType::Auth2faDisable,
                "disable_2fa",
                "auth",
                AuditResult::Success,
            )
            .user(user.id)
            .metadata(Self::audit_meta(signals)),
        );

        tracing::info!(user_id = %user.id, "Two-factor authentication disabled");
        Ok(())
    }

    /// Replace all backup codes; requires a valid TOTP code.
    pub async fn regenerate_backup_codes(
        &self,
        user_id: ObjectId,
        code: &str,
    ) -> Result<Vec<String>, ServiceError> {
        let user = self
            .db
            .find_user_by_id(&user_id)
            .await?
            .ok_or(ServiceError::UserNotFound)?;

        if !user.two_factor_enabled {
            return Err(ServiceError::Validation(
                "Two-factor authentication is not enabled".to_string(),
            ));
        }

        let secret = user
            .two_factor_secret
            .as_deref()
            .ok_or(ServiceError::InvalidTwoFactorCode)?;
        if !self
            .two_factor
            .verify_totp(secret, &user.email, code)
            .unwrap_or(false)
        {
            return Err(ServiceError::InvalidTwoFactorCode);
        }

        let (codes, hashes) = generate_backup_codes()?;
        self.db
            .users()
            .update_one(
                doc! { "_id": user.id },
                doc! { "$set": { "two_factor_backup_codes": hashes } },
                None,
            )
            .await?;

        Ok(codes)
    }
}
