//! Refresh-session persistence: validation, rotation support, revocation,
//! per-user enumeration.

use chrono::{DateTime as ChronoDateTime, Utc};
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, DateTime};

use crate::db::{is_duplicate_key_error, MongoDb};
use crate::models::{AuditEventType, AuditMetadata, AuditResult, DeviceSnapshot, RefreshSession};
use crate::services::audit::{AuditEvent, AuditService};
use crate::services::error::ServiceError;
use crate::services::token::hash_token;

pub const REASON_ROTATED: &str = "rotated";
pub const REASON_LOGOUT: &str = "logout";
pub const REASON_REUSE: &str = "token_reuse_detected";
pub const REASON_PASSWORD_CHANGE: &str = "password_changed";
pub const REASON_USER_REVOKED: &str = "revoked_by_user";

#[derive(Clone)]
pub struct SessionStore {
    db: MongoDb,
    audit: AuditService,
}

impl SessionStore {
    pub fn new(db: MongoDb, audit: AuditService) -> Self {
        Self { db, audit }
    }

    /// Insert a new session keyed by the token hash. A unique-index conflict
    /// means another rotation already persisted this token: surfaced as
    /// `RefreshInProgress` so no tokens are issued twice.
    pub async fn create(
        &self,
        token: &str,
        user_id: ObjectId,
        device: DeviceSnapshot,
        family: String,
        expires_at: ChronoDateTime<Utc>,
    ) -> Result<RefreshSession, ServiceError> {
        let session = RefreshSession::new(user_id, hash_token(token), family, device, expires_at);

        match self.db.refresh_sessions().insert_one(&session, None).await {
            Ok(_) => Ok(session),
            Err(err) if is_duplicate_key_error(&err) => Err(ServiceError::RefreshInProgress),
            Err(err) => Err(ServiceError::Database(err)),
        }
    }

    /// Look up a presented token. A hash that matches a revoked session
    /// still inside its original TTL is a reuse signal: the whole family is
    /// revoked and the event audited before the caller sees a failure.
    pub async fn validate(&self, token: &str) -> Result<RefreshSession, ServiceError> {
        let session = self
            .db
            .find_session_by_hash(&hash_token(token))
            .await?
            .ok_or(ServiceError::InvalidToken)?;

        if session.is_reuse_signal() {
            tracing::warn!(
                user_id = %session.user_id,
                family = %session.family,
                "Revoked refresh token presented inside its TTL; revoking family"
            );
            self.revoke_family(&session.family, REASON_REUSE).await?;
            self.audit.log(
                AuditEvent::new(
                    AuditEventType::SecuritySuspiciousActivity,
                    "refresh_token_reuse",
                    "session",
                    AuditResult::Failure,
                )
                .user(session.user_id)
                .metadata(AuditMetadata {
                    ip: Some(session.device.ip_address.clone()),
                    user_agent: Some(session.device.user_agent.clone()),
                    location: session.device.location.clone(),
                    extra: Some(doc! { "family": &session.family }),
                })
                .risk(80),
            );
            return Err(ServiceError::InvalidToken);
        }

        if !session.is_active() {
            return Err(ServiceError::InvalidToken);
        }

        self.db
            .refresh_sessions()
            .update_one(
                doc! { "_id": session.id },
                doc! { "$set": { "last_used_at": DateTime::now() } },
                None,
            )
            .await?;

        Ok(session)
    }

    /// Revoke the session matching a presented token. Returns whether a
    /// live session was actually revoked.
    pub async fn revoke(&self, token: &str, reason: &str) -> Result<bool, ServiceError> {
        let result = self
            .db
            .refresh_sessions()
            .update_one(
                doc! { "token_hash": hash_token(token), "revoked": false },
                revocation_update(reason),
                None,
            )
            .await?;
        Ok(result.modified_count > 0)
    }

    pub async fn revoke_family(&self, family: &str, reason: &str) -> Result<u64, ServiceError> {
        let result = self
            .db
            .refresh_sessions()
            .update_many(
                doc! { "family": family, "revoked": false },
                revocation_update(reason),
                None,
            )
            .await?;
        Ok(result.modified_count)
    }

    pub async fn revoke_all(&self, user_id: ObjectId, reason: &str) -> Result<u64, ServiceError> {
        let result = self
            .db
            .refresh_sessions()
            .update_many(
                doc! { "user_id": user_id, "revoked": false },
                revocation_update(reason),
                None,
            )
            .await?;
        Ok(result.modified_count)
    }

    /// Active (not expired, not revoked) sessions for a user.
    pub async fn list_active(&self, user_id: ObjectId) -> Result<Vec<RefreshSession>, ServiceError> {
        let cursor = self
            .db
            .refresh_sessions()
            .find(
                doc! {
                    "user_id": user_id,
                    "revoked": false,
                    "expires_at": { "$gt": DateTime::now() },
                },
                mongodb::options::FindOptions::builder()
                    .sort(doc! { "last_used_at": -1 })
                    .build(),
            )
            .await?;
        Ok(cursor.try_collect().await.map_err(ServiceError::Database)?)
    }

    /// Revoke one session by id. The owner filter is part of the query, so
    /// a non-owner can never match another user's session.
    pub async fn revoke_by_id(
        &self,
        user_id: ObjectId,
        session_id: ObjectId,
    ) -> Result<(), ServiceError> {
        let result = self
            .db
            .refresh_sessions()
            .update_one(
                doc! { "_id": session_id, "user_id": user_id, "revoked": false },
                revocation_update(REASON_USER_REVOKED),
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(ServiceError::NotFound("Session not found".to_string()));
        }
        Ok(())
    }
}

fn revocation_update(reason: &str) -> mongodb::bson::Document {
    doc! {
        "$set": {
            "revoked": true,
            "revoked_reason": reason,
            "revoked_at": DateTime::now(),
        }
    }
}
