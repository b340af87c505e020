use chrono::{DateTime as ChronoDateTime, Utc};
use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

/// Client device snapshot captured when a refresh session is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    pub user_agent: String,
    pub ip_address: String,
    pub location: Option<String>,
}

/// Server-side record of a refresh token.
///
/// Only the SHA-256 of the token is stored; uniqueness on that hash is what
/// makes concurrent rotation race-safe. `family` groups tokens descended
/// from the same login for reuse detection and bulk revocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshSession {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user_id: ObjectId,
    pub token_hash: String,
    pub family: String,
    pub device: DeviceSnapshot,
    pub created_at: DateTime,
    pub last_used_at: DateTime,
    pub expires_at: DateTime,
    #[serde(default)]
    pub revoked: bool,
    pub revoked_reason: Option<String>,
    pub revoked_at: Option<DateTime>,
}

impl RefreshSession {
    pub fn new(
        user_id: ObjectId,
        token_hash: String,
        family: String,
        device: DeviceSnapshot,
        expires_at: ChronoDateTime<Utc>,
    ) -> Self {
        let now = DateTime::now();
        Self {
            id: ObjectId::new(),
            user_id,
            token_hash,
            family,
            device,
            created_at: now,
            last_used_at: now,
            expires_at: DateTime::from_chrono(expires_at),
            revoked: false,
            revoked_reason: None,
            revoked_at: None,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.to_chrono() <= Utc::now()
    }

    /// Valid for use: not revoked, not expired.
    pub fn is_active(&self) -> bool {
        !self.revoked && !self.is_expired()
    }

    /// A revoked session presented again inside its original TTL is the
    /// reuse signal that triggers family-wide revocation.
    pub fn is_reuse_signal(&self) -> bool {
        self.revoked && !self.is_expired()
    }
}

/// Session info exposed by the enumeration endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    pub user_agent: String,
    pub ip_address: String,
    pub location: Option<String>,
    pub created_at: ChronoDateTime<Utc>,
    pub last_used_at: ChronoDateTime<Utc>,
    pub expires_at: ChronoDateTime<Utc>,
}

impl From<RefreshSession> for SessionInfo {
    fn from(s: RefreshSession) -> Self {
        Self {
            id: s.id.to_hex(),
            device_id: s.device.device_id,
            device_name: s.device.device_name,
            user_agent: s.device.user_agent,
            ip_address: s.device.ip_address,
            location: s.device.location,
            created_at: s.created_at.to_chrono(),
            last_used_at: s.last_used_at.to_chrono(),
            expires_at: s.expires_at.to_chrono(),
        }
    }
}
