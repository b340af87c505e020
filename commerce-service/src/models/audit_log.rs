use mongodb::bson::{oid::ObjectId, DateTime, Document};
use serde::{Deserialize, Serialize};

/// Closed set of auditable events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEventType {
    #[serde(rename = "auth.login")]
    AuthLogin,
    #[serde(rename = "auth.logout")]
    AuthLogout,
    #[serde(rename = "auth.register")]
    AuthRegister,
    #[serde(rename = "auth.password_reset")]
    AuthPasswordReset,
    #[serde(rename = "auth.email_verify")]
    AuthEmailVerify,
    #[serde(rename = "auth.2fa_enable")]
    Auth2faEnable,
    #[serde(rename = "auth.2fa_disable")]
    Auth2faDisable,
    #[serde(rename = "auth.session_revoke")]
    AuthSessionRevoke,
    #[serde(rename = "payment.initiated")]
    PaymentInitiated,
    #[serde(rename = "payment.completed")]
    PaymentCompleted,
    #[serde(rename = "payment.failed")]
    PaymentFailed,
    #[serde(rename = "payment.refunded")]
    PaymentRefunded,
    #[serde(rename = "order.created")]
    OrderCreated,
    #[serde(rename = "order.updated")]
    OrderUpdated,
    #[serde(rename = "order.cancelled")]
    OrderCancelled,
    #[serde(rename = "order.shipped")]
    OrderShipped,
    #[serde(rename = "user.profile_update")]
    UserProfileUpdate,
    #[serde(rename = "user.address_change")]
    UserAddressChange,
    #[serde(rename = "user.role_change")]
    UserRoleChange,
    #[serde(rename = "user.account_locked")]
    UserAccountLocked,
    #[serde(rename = "admin.user_access")]
    AdminUserAccess,
    #[serde(rename = "admin.config_change")]
    AdminConfigChange,
    #[serde(rename = "admin.data_export")]
    AdminDataExport,
    #[serde(rename = "admin.product_created")]
    AdminProductCreated,
    #[serde(rename = "admin.product_updated")]
    AdminProductUpdated,
    #[serde(rename = "admin.product_deleted")]
    AdminProductDeleted,
    #[serde(rename = "security.failed_login")]
    SecurityFailedLogin,
    #[serde(rename = "security.rate_limit_exceeded")]
    SecurityRateLimitExceeded,
    #[serde(rename = "security.suspicious_activity")]
    SecuritySuspiciousActivity,
    #[serde(rename = "security.fraud_detected")]
    SecurityFraudDetected,
    #[serde(rename = "system.backup")]
    SystemBackup,
    #[serde(rename = "system.restore")]
    SystemRestore,
    #[serde(rename = "system.maintenance")]
    SystemMaintenance,
}

impl AuditEventType {
    /// Canonical wire name; also the value signed into the entry.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::AuthLogin => "auth.login",
            AuditEventType::AuthLogout => "auth.logout",
            AuditEventType::AuthRegister => "auth.register",
            AuditEventType::AuthPasswordReset => "auth.password_reset",
            AuditEventType::AuthEmailVerify => "auth.email_verify",
            AuditEventType::Auth2faEnable => "auth.2fa_enable",
            AuditEventType::Auth2faDisable => "auth.2fa_disable",
            AuditEventType::AuthSessionRevoke => "auth.session_revoke",
            AuditEventType::PaymentInitiated => "payment.initiated",
            AuditEventType::PaymentCompleted => "payment.completed",
            AuditEventType::PaymentFailed => "payment.failed",
            AuditEventType::PaymentRefunded => "payment.refunded",
            AuditEventType::OrderCreated => "order.created",
            AuditEventType::OrderUpdated => "order.updated",
            AuditEventType::OrderCancelled => "order.cancelled",
            AuditEventType::OrderShipped => "order.shipped",
            AuditEventType::UserProfileUpdate => "user.profile_update",
            AuditEventType::UserAddressChange => "user.address_change",
            AuditEventType::UserRoleChange => "user.role_change",
            AuditEventType::UserAccountLocked => "user.account_locked",
            AuditEventType::AdminUserAccess => "admin.user_access",
            AuditEventType::AdminConfigChange => "admin.config_change",
            AuditEventType::AdminDataExport => "admin.data_export",
            AuditEventType::AdminProductCreated => "admin.product_created",
            AuditEventType::AdminProductUpdated => "admin.product_updated",
            AuditEventType::AdminProductDeleted => "admin.product_deleted",
            AuditEventType::SecurityFailedLogin => "security.failed_login",
            AuditEventType::SecurityRateLimitExceeded => "security.rate_limit_exceeded",
            AuditEventType::SecuritySuspiciousActivity => "security.suspicious_activity",
            AuditEventType::SecurityFraudDetected => "security.fraud_detected",
            AuditEventType::SystemBackup => "system.backup",
            AuditEventType::SystemRestore => "system.restore",
            AuditEventType::SystemMaintenance => "system.maintenance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Success,
    Failure,
    Partial,
}

impl AuditResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditResult::Success => "success",
            AuditResult::Failure => "failure",
            AuditResult::Partial => "partial",
        }
    }
}

/// Request context attached to an entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditMetadata {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub location: Option<String>,
    /// Free-form event-specific context.
    pub extra: Option<Document>,
}

/// Before/after snapshots for mutating events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditChanges {
    pub before: Option<Document>,
    pub after: Option<Document>,
}

/// One immutable row of the audit trail.
///
/// `signature` is an HMAC over the canonicalized core fields; `previous_hash`
/// chains to the prior entry. Once inserted no field changes; the store
/// exposes no update or delete surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub timestamp: DateTime,
    pub event_type: AuditEventType,
    pub user_id: Option<ObjectId>,
    pub action: String,
    pub resource: String,
    pub resource_id: Option<String>,
    pub changes: Option<AuditChanges>,
    #[serde(default)]
    pub metadata: AuditMetadata,
    pub result: AuditResult,
    pub error_message: Option<String>,
    /// 0-100 when the event carries a risk assessment.
    pub risk_score: Option<i32>,
    pub signature: String,
    pub previous_hash: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_round_trips_through_serde() {
        let json = serde_json::to_string(&AuditEventType::SecurityFailedLogin).unwrap();
        assert_eq!(json, "\"security.failed_login\"");
        let back: AuditEventType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, AuditEventType::SecurityFailedLogin);
    }

    #[test]
    fn as_str_matches_serde_rename() {
        for ev in [
            AuditEventType::AuthLogin,
            AuditEventType::Auth2faEnable,
            AuditEventType::PaymentInitiated,
            AuditEventType::AdminProductDeleted,
            AuditEventType::SystemMaintenance,
        ] {
            let json = serde_json::to_string(&ev).unwrap();
            assert_eq!(json.trim_matches('"'), ev.as_str());
        }
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        assert!(serde_json::from_str::<AuditEventType>("\"auth.unknown\"").is_err());
    }
}
