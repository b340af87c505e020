use chrono::{DateTime as ChronoDateTime, Utc};
use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

/// User role. Clients can never set this; registration forces `User`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

/// Identity provider the account was created through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthProvider {
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "external-idp")]
    ExternalIdp,
}

/// Device the user marked as seen via a successful login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustedDevice {
    pub device_id: String,
    pub first_seen: DateTime,
}

/// Append-only login history entry kept on the user document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginHistoryEntry {
    pub timestamp: DateTime,
    pub ip: String,
    pub user_agent: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Login history is capped to the most recent entries on write.
pub const LOGIN_HISTORY_CAP: usize = 50;

/// Number of previous password hashes retained for reuse prevention.
pub const PASSWORD_HISTORY_CAP: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    /// Stored lowercased; uniqueness is enforced by index.
    pub email: String,
    pub password_hash: String,
    pub name: Option<String>,
    pub role: Role,
    pub provider: AuthProvider,
    /// Monotone counter; bumping it invalidates every outstanding token.
    pub token_version: i64,
    pub is_email_verified: bool,
    pub email_verification_token: Option<String>,
    pub email_verification_expires: Option<DateTime>,
    pub password_reset_token: Option<String>,
    pub password_reset_expires: Option<DateTime>,
    /// bcrypt hashes of the last few passwords, newest first.
    #[serde(default)]
    pub password_history: Vec<String>,
    pub last_password_change: Option<DateTime>,
    #[serde(default)]
    pub two_factor_enabled: bool,
    /// AES-256-GCM ciphertext of the base32 TOTP secret, base64-encoded.
    pub two_factor_secret: Option<String>,
    /// bcrypt hashes of unused backup codes.
    #[serde(default)]
    pub two_factor_backup_codes: Vec<String>,
    pub two_factor_temp_token: Option<String>,
    pub two_factor_temp_expires: Option<DateTime>,
    #[serde(default)]
    pub failed_login_attempts: i32,
    pub account_locked_until: Option<DateTime>,
    #[serde(default)]
    pub trusted_devices: Vec<TrustedDevice>,
    #[serde(default)]
    pub login_history: Vec<LoginHistoryEntry>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl User {
    pub fn new(email: String, password_hash: String, name: Option<String>) -> Self {
        let now = DateTime::now();
        Self {
            id: ObjectId::new(),
            email: email.to_lowercase(),
            password_hash,
            name,
            role: Role::User,
            provider: AuthProvider::Local,
            token_version: 0,
            is_email_verified: false,
            email_verification_token: None,
            email_verification_expires: None,
            password_reset_token: None,
            password_reset_expires: None,
            password_history: Vec::new(),
            last_password_change: None,
            two_factor_enabled: false,
            two_factor_secret: None,
            two_factor_backup_codes: Vec::new(),
            two_factor_temp_token: None,
            two_factor_temp_expires: None,
            failed_login_attempts: 0,
            account_locked_until: None,
            trusted_devices: Vec::new(),
            login_history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the account is currently locked out.
    pub fn is_locked(&self) -> bool {
        match self.account_locked_until {
            Some(until) => until.to_chrono() > Utc::now(),
            None => false,
        }
    }

    pub fn has_trusted_device(&self, device_id: &str) -> bool {
        self.trusted_devices.iter().any(|d| d.device_id == device_id)
    }

    /// API-safe projection: no hash, no secrets, no tokens.
    pub fn sanitized(&self) -> SanitizedUser {
        SanitizedUser {
            id: self.id.to_hex(),
            email: self.email.clone(),
            name: self.name.clone(),
            role: self.role,
            provider: self.provider,
            is_email_verified: self.is_email_verified,
            two_factor_enabled: self.two_factor_enabled,
            created_at: self.created_at.to_chrono(),
        }
    }
}

/// User without sensitive fields, for API responses.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizedUser {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub role: Role,
    pub provider: AuthProvider,
    pub is_email_verified: bool,
    pub two_factor_enabled: bool,
    pub created_at: ChronoDateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_user_defaults() {
        let user = User::new("Alice@Example.COM".to_string(), "hash".to_string(), None);
        assert_eq!(user.email, "alice@example.com");
        assert_eq!(user.role, Role::User);
        assert_eq!(user.provider, AuthProvider::Local);
        assert_eq!(user.token_version, 0);
        assert!(!user.is_email_verified);
        assert!(!user.is_locked());
    }

    #[test]
    fn lock_expiry_is_honored() {
        let mut user = User::new("a@b.c".to_string(), "hash".to_string(), None);
        user.account_locked_until = Some(DateTime::from_chrono(
            Utc::now() + chrono::Duration::minutes(30),
        ));
        assert!(user.is_locked());

        user.account_locked_until = Some(DateTime::from_chrono(
            Utc::now() - chrono::Duration::seconds(1),
        ));
        assert!(!user.is_locked());
    }

    #[test]
    fn sanitized_omits_secrets() {
        let user = User::new("a@b.c".to_string(), "hash".to_string(), None);
        let json = serde_json::to_value(user.sanitized()).unwrap();
        assert!(json.get("passwordHash").is_none());
        assert!(json.get("password_hash").is_none());
        assert!(json.get("twoFactorSecret").is_none());
        assert_eq!(json["email"], "a@b.c");
    }

    #[test]
    fn trusted_device_lookup() {
        let mut user = User::new("a@b.c".to_string(), "hash".to_string(), None);
        user.trusted_devices.push(TrustedDevice {
            device_id: "device-1".to_string(),
            first_seen: DateTime::now(),
        });
        assert!(user.has_trusted_device("device-1"));
        assert!(!user.has_trusted_device("device-2"));
    }
}
