//! Tamper-evident audit trail.
//!
//! Every entry carries an HMAC-SHA256 signature over its canonicalized core
//! fields and a SHA-256 link to the previous entry. The chain is best-effort
//! across concurrent writers: linkage is for tamper detection, not
//! prevention, and verification flags mismatches instead of failing hard.

use async_trait::async_trait;
use chrono::SecondsFormat;
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, DateTime, Document};
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use service_core::utils::signature::{constant_time_eq, hmac_sha256_hex};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::db::MongoDb;
use crate::models::{
    audit_log::AuditChanges, AuditEventType, AuditLogEntry, AuditMetadata, AuditResult,
};
use crate::services::metrics;

/// Input for one audit entry; the service fills in timestamp, signature,
/// and chain linkage.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub user_id: Option<ObjectId>,
    pub action: String,
    pub resource: String,
    pub resource_id: Option<String>,
    pub changes: Option<AuditChanges>,
    pub metadata: AuditMetadata,
    pub result: AuditResult,
    pub error_message: Option<String>,
    pub risk_score: Option<i32>,
}

impl AuditEvent {
    pub fn new(
        event_type: AuditEventType,
        action: impl Into<String>,
        resource: impl Into<String>,
        result: AuditResult,
    ) -> Self {
        Self {
            event_type,
            user_id: None,
            action: action.into(),
            resource: resource.into(),
            resource_id: None,
            changes: None,
            metadata: AuditMetadata::default(),
            result,
            error_message: None,
            risk_score: None,
        }
    }

    pub fn user(mut self, user_id: ObjectId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn resource_id(mut self, id: impl Into<String>) -> Self {
        self.resource_id = Some(id.into());
        self
    }

    pub fn metadata(mut self, metadata: AuditMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn extra(mut self, extra: Document) -> Self {
        self.metadata.extra = Some(extra);
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn risk(mut self, score: i32) -> Self {
        self.risk_score = Some(score.clamp(0, 100));
        self
    }
}

/// Append-and-read-only storage surface. No update or delete exists on this
/// trait, which is how immutability is enforced at the storage layer.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn latest(&self) -> Result<Option<AuditLogEntry>, anyhow::Error>;
    async fn insert(&self, entry: &AuditLogEntry) -> Result<(), anyhow::Error>;
    /// All entries ordered by timestamp ascending, for chain verification.
    async fn walk(&self) -> Result<Vec<AuditLogEntry>, anyhow::Error>;
}

pub struct MongoAuditStore {
    db: MongoDb,
}

impl MongoAuditStore {
    pub fn new(db: MongoDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuditStore for MongoAuditStore {
    async fn latest(&self) -> Result<Option<AuditLogEntry>, anyhow::Error> {
        let options = mongodb::options::FindOneOptions::builder()
            .sort(doc! { "timestamp": -1, "_id": -1 })
            .build();
        Ok(self.db.audit_logs().find_one(None, options).await?)
    }

    async fn insert(&self, entry: &AuditLogEntry) -> Result<(), anyhow::Error> {
        self.db.audit_logs().insert_one(entry, None).await?;
        Ok(())
    }

    async fn walk(&self) -> Result<Vec<AuditLogEntry>, anyhow::Error> {
        let options = mongodb::options::FindOptions::builder()
            .sort(doc! { "timestamp": 1, "_id": 1 })
            .build();
        let cursor = self.db.audit_logs().find(None, options).await?;
        Ok(cursor.try_collect().await?)
    }
}

/// In-memory store for tests and chain-property checks.
#[derive(Default)]
pub struct MemoryAuditStore {
    entries: std::sync::Mutex<Vec<AuditLogEntry>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn latest(&self) -> Result<Option<AuditLogEntry>, anyhow::Error> {
        Ok(self.entries.lock().unwrap().last().cloned())
    }

    async fn insert(&self, entry: &AuditLogEntry) -> Result<(), anyhow::Error> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn walk(&self) -> Result<Vec<AuditLogEntry>, anyhow::Error> {
        Ok(self.entries.lock().unwrap().clone())
    }
}

/// Canonical signed subset. Field order is the canonical form; serializing
/// this struct is the only way a signature payload is ever produced.
#[derive(Serialize)]
struct CanonicalEntry<'a> {
    timestamp: &'a str,
    event_type: &'a str,
    user_id: Option<String>,
    action: &'a str,
    resource: &'a str,
    result: &'a str,
}

/// A mismatch found while walking the chain.
#[derive(Debug)]
pub struct ChainMismatch {
    pub index: usize,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

#[derive(Debug)]
pub struct ChainReport {
    pub entries: usize,
    pub signature_failures: Vec<usize>,
    pub link_mismatches: Vec<ChainMismatch>,
}

impl ChainReport {
    pub fn is_intact(&self) -> bool {
        self.signature_failures.is_empty() && self.link_mismatches.is_empty()
    }
}

#[derive(Clone)]
pub struct AuditService {
    store: Arc<dyn AuditStore>,
    key: Secret<String>,
}

fn timestamp_iso(ts: &DateTime) -> String {
    ts.to_chrono().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl AuditService {
    pub fn new(store: Arc<dyn AuditStore>, key: Secret<String>) -> Self {
        Self { store, key }
    }

    fn sign(&self, entry_ts: &DateTime, event: &AuditEvent) -> Result<String, anyhow::Error> {
        let ts = timestamp_iso(entry_ts);
        let canonical = CanonicalEntry {
            timestamp: &ts,
            event_type: event.event_type.as_str(),
            user_id: event.user_id.map(|id| id.to_hex()),
            action: &event.action,
            resource: &event.resource,
            result: event.result.as_str(),
        };
        let payload = serde_json::to_string(&canonical)?;
        hmac_sha256_hex(self.key.expose_secret().as_bytes(), payload.as_bytes())
    }

    /// `SHA256(signature || timestamp_ISO8601)` of an entry, the value the
    /// next entry stores as `previous_hash`.
    pub fn link_hash(entry: &AuditLogEntry) -> String {
        let material = format!("{}{}", entry.signature, timestamp_iso(&entry.timestamp));
        hex::encode(Sha256::digest(material.as_bytes()))
    }

    /// Append one entry: link to the latest, sign, insert.
    pub async fn append(&self, event: AuditEvent) -> Result<AuditLogEntry, anyhow::Error> {
        let previous_hash = self.store.latest().await?.map(|prev| Self::link_hash(&prev));

        let timestamp = DateTime::now();
        let signature = self.sign(&timestamp, &event)?;

        let entry = AuditLogEntry {
            id: None,
            timestamp,
            event_type: event.event_type,
            user_id: event.user_id,
            action: event.action,
            resource: event.resource,
            resource_id: event.resource_id,
            changes: event.changes,
            metadata: event.metadata,
            result: event.result,
            error_message: event.error_message,
            risk_score: event.risk_score,
            signature,
            previous_hash,
        };

        self.store.insert(&entry).await?;
        Ok(entry)
    }

    /// Fire-and-forget append. Audit failures never block the originating
    /// security operation; the gap shows up in metrics instead.
    pub fn log(&self, event: AuditEvent) {
        let service = self.clone();
        let event_type = event.event_type;
        tokio::spawn(async move {
            if let Err(err) = service.append(event).await {
                metrics::incr(&metrics::AUDIT_WRITE_FAILURES);
                tracing::error!(
                    error = %err,
                    event_type = event_type.as_str(),
                    "Failed to write audit entry"
                );
            }
        });
    }

    /// Recompute and compare an entry's signature in constant time.
    pub fn verify_entry(&self, entry: &AuditLogEntry) -> bool {
        let ts = timestamp_iso(&entry.timestamp);
        let canonical = CanonicalEntry {
            timestamp: &ts,
            event_type: entry.event_type.as_str(),
            user_id: entry.user_id.map(|id| id.to_hex()),
            action: &entry.action,
            resource: &entry.resource,
            result: entry.result.as_str(),
        };
        let payload = match serde_json::to_string(&canonical) {
            Ok(p) => p,
            Err(_) => return false,
        };
        let expected =
            match hmac_sha256_hex(self.key.expose_secret().as_bytes(), payload.as_bytes()) {
                Ok(s) => s,
                Err(_) => return false,
            };
        constant_time_eq(expected.as_bytes(), entry.signature.as_bytes())
    }

    /// Walk the chain from the earliest entry, recomputing signatures and
    /// `previous_hash` links. Mismatches are reported, not fatal.
    pub async fn verify_chain(&self) -> Result<ChainReport, anyhow::Error> {
        let entries = self.store.walk().await?;
        let mut signature_failures = Vec::new();
        let mut link_mismatches = Vec::new();

        for (i, entry) in entries.iter().enumerate() {
            if !self.verify_entry(entry) {
                signature_failures.push(i);
            }
            if i > 0 {
                let expected = Self::link_hash(&entries[i - 1]);
                if entry.previous_hash.as_deref() != Some(expected.as_str()) {
                    link_mismatches.push(ChainMismatch {
                        index: i,
                        expected: Some(expected),
                        actual: entry.previous_hash.clone(),
                    });
                }
            }
        }

        Ok(ChainReport {
            entries: entries.len(),
            signature_failures,
            link_mismatches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuditService {
        AuditService::new(
            Arc::new(MemoryAuditStore::new()),
            Secret::new("test-audit-hmac-key".to_string()),
        )
    }

    fn login_event(user: ObjectId) -> AuditEvent {
        AuditEvent::new(
            AuditEventType::AuthLogin,
            "login",
            "auth",
            AuditResult::Success,
        )
        .user(user)
    }

    #[tokio::test]
    async fn entries_chain_by_previous_hash() {
        let service = service();
        let user = ObjectId::new();

        let e1 = service.append(login_event(user)).await.unwrap();
        let e2 = service.append(login_event(user)).await.unwrap();
        let e3 = service.append(login_event(user)).await.unwrap();

        assert!(e1.previous_hash.is_none());
        assert_eq!(e2.previous_hash.as_deref(), Some(AuditService::link_hash(&e1).as_str()));
        assert_eq!(e3.previous_hash.as_deref(), Some(AuditService::link_hash(&e2).as_str()));
    }

    #[tokio::test]
    async fn signatures_verify_and_detect_tampering() {
        let service = service();
        let mut entry = service.append(login_event(ObjectId::new())).await.unwrap();
        assert!(service.verify_entry(&entry));

        entry.action = "privilege_escalation".to_string();
        assert!(!service.verify_entry(&entry));
    }

    #[tokio::test]
    async fn chain_verification_passes_for_honest_writer() {
        let service = service();
        for _ in 0..5 {
            service.append(login_event(ObjectId::new())).await.unwrap();
        }
        let report = service.verify_chain().await.unwrap();
        assert_eq!(report.entries, 5);
        assert!(report.is_intact());
    }

    #[tokio::test]
    async fn chain_verification_flags_a_tampered_middle_entry() {
        let store = Arc::new(MemoryAuditStore::new());
        let service = AuditService::new(store.clone(), Secret::new("k".to_string()));
        for _ in 0..3 {
            service.append(login_event(ObjectId::new())).await.unwrap();
        }

        {
            let mut entries = store.entries.lock().unwrap();
            entries[1].result = AuditResult::Failure;
        }

        let report = service.verify_chain().await.unwrap();
        assert!(!report.is_intact());
        // Tampered signature on entry 1, and entry 2's link no longer
        // matches the recomputed hash chain input.
        assert_eq!(report.signature_failures, vec![1]);
    }

    #[tokio::test]
    async fn wrong_key_fails_verification() {
        let store = Arc::new(MemoryAuditStore::new());
        let writer = AuditService::new(store.clone(), Secret::new("key-a".to_string()));
        let entry = writer.append(login_event(ObjectId::new())).await.unwrap();

        let reader = AuditService::new(store, Secret::new("key-b".to_string()));
        assert!(!reader.verify_entry(&entry));
    }

    #[test]
    fn risk_score_is_clamped() {
        let event = AuditEvent::new(
            AuditEventType::SecurityFailedLogin,
            "login",
            "auth",
            AuditResult::Failure,
        )
        .risk(250);
        assert_eq!(event.risk_score, Some(100));
    }
}
