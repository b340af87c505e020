//! Read-side anomaly and fraud scoring.
//!
//! Scorers never mutate user state: they return a score and reasons and the
//! caller decides. Query failures degrade to "not anomalous" and log, so a
//! scoring outage cannot take down checkout.

use chrono::{Duration, Utc};
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Bson, DateTime};
use std::sync::Arc;

use crate::db::MongoDb;
use crate::models::{AuditEventType, AuditResult, Order};
use crate::services::audit::{AuditEvent, AuditService};
use crate::services::metrics;

/// Score at which an event is considered anomalous and audited.
const AUDIT_THRESHOLD: u32 = 60;
/// Score at which the alert hook fires.
const ALERT_THRESHOLD: u32 = 70;
/// Combined score at which payment-intent creation is rejected.
pub const PAYMENT_GATE_THRESHOLD: u32 = 80;

/// Amount thresholds in minor units.
const HIGH_VALUE_MINOR: i64 = 1_000_00;
const VERY_HIGH_VALUE_MINOR: i64 = 10_000_00;
const LARGE_PAYMENT_MINOR: i64 = 5_000_00;

#[derive(Debug, Clone)]
pub struct AnomalyResult {
    pub is_anomalous: bool,
    /// 0-100.
    pub risk_score: u32,
    pub reasons: Vec<String>,
    pub recommendations: Vec<String>,
}

impl AnomalyResult {
    fn from_score(score: u32, reasons: Vec<String>, recommendations: Vec<String>) -> Self {
        Self {
            is_anomalous: score >= AUDIT_THRESHOLD,
            risk_score: score.min(100),
            reasons,
            recommendations,
        }
    }

    pub fn not_anomalous() -> Self {
        Self {
            is_anomalous: false,
            risk_score: 0,
            reasons: Vec::new(),
            recommendations: Vec::new(),
        }
    }
}

/// Receives high-score alerts. The default sink logs; deployments wire
/// their own paging here.
pub trait AlertHook: Send + Sync {
    fn raise(&self, user_id: Option<ObjectId>, score: u32, reasons: &[String]);
}

pub struct LogAlertHook;

impl AlertHook for LogAlertHook {
    fn raise(&self, user_id: Option<ObjectId>, score: u32, reasons: &[String]) {
        tracing::error!(
            user_id = ?user_id.map(|id| id.to_hex()),
            score,
            ?reasons,
            "High-risk activity alert"
        );
    }
}

// Pure scoring rules, separated from the queries that feed them.

pub fn score_high_value_order(
    amount_minor: i64,
    prior_order_totals: &[i64],
    unseen_shipping_address: bool,
) -> (u32, Vec<String>) {
    let mut score = 0;
    let mut reasons = Vec::new();

    if !prior_order_totals.is_empty() {
        let avg = prior_order_totals.iter().sum::<i64>() / prior_order_totals.len() as i64;
        if avg > 0 && amount_minor > avg * 3 {
            score += 40;
            reasons.push("order exceeds 3x the average of recent orders".to_string());
        }
    }

    if unseen_shipping_address && amount_minor > HIGH_VALUE_MINOR {
        score += 30;
        reasons.push("unseen shipping address on a high-value order".to_string());
    }

    if prior_order_totals.is_empty() && amount_minor > HIGH_VALUE_MINOR {
        score += 50;
        reasons.push("first-ever order above the high-value threshold".to_string());
    }

    if amount_minor > VERY_HIGH_VALUE_MINOR {
        score += 25;
        reasons.push("order above the very-high-value threshold".to_string());
    }

    (score, reasons)
}

pub fn score_rapid_orders(hourly: u64, daily: u64) -> (u32, Vec<String>) {
    let mut score = 0;
    let mut reasons = Vec::new();

    if hourly > 5 {
        score += 70;
        reasons.push(format!("{} orders created in the last hour", hourly));
    }
    if daily > 20 {
        score += 50;
        reasons.push(format!("{} orders created in the last 24 hours", daily));
    }

    (score, reasons)
}

pub fn score_failed_logins(
    by_user_15m: u64,
    by_ip_15m: u64,
    ip_hour_timestamps_secs: &[i64],
) -> (u32, Vec<String>) {
    let mut score = 0;
    let mut reasons = Vec::new();

    if by_user_15m > 5 {
        score += 60;
        reasons.push(format!(
            "{} failed logins for this account in 15 minutes",
            by_user_15m
        ));
    }
    if by_ip_15m > 10 {
        score += 70;
        reasons.push(format!("{} failed logins from this IP in 15 minutes", by_ip_15m));
    }

    if ip_hour_timestamps_secs.len() >= 10 {
        let gaps: Vec<i64> = ip_hour_timestamps_secs
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .collect();
        if !gaps.is_empty() {
            let mean_gap = gaps.iter().sum::<i64>() as f64 / gaps.len() as f64;
            if mean_gap < 5.0 {
                score += 80;
                reasons.push("sub-5s mean gap between attempts (brute-force timing)".to_string());
            }
        }
    }

    (score, reasons)
}

pub fn score_payment_fraud(
    failed_payments_24h: u64,
    amount_minor: i64,
    payment_events_24h: u64,
    distinct_ips_24h: u64,
) -> (u32, Vec<String>) {
    let mut score = 0;
    let mut reasons = Vec::new();

    if failed_payments_24h > 3 {
        score += 50;
        reasons.push(format!(
            "{} failed payments in the last 24 hours",
            failed_payments_24h
        ));
    }
    if amount_minor > LARGE_PAYMENT_MINOR {
        score += 20;
        reasons.push("large payment amount".to_string());
    }
    if payment_events_24h > 10 {
        score += 40;
        reasons.push(format!(
            "{} payment events in the last 24 hours",
            payment_events_24h
        ));
    }
    if distinct_ips_24h > 5 {
        score += 30;
        reasons.push(format!(
            "payments from {} distinct IPs in 24 hours",
            distinct_ips_24h
        ));
    }

    (score, reasons)
}

#[derive(Clone)]
pub struct AnomalyService {
    db: MongoDb,
    audit: AuditService,
    alert: Arc<dyn AlertHook>,
}

impl AnomalyService {
    pub fn new(db: MongoDb, audit: AuditService, alert: Arc<dyn AlertHook>) -> Self {
        Self { db, audit, alert }
    }

    fn finish(&self, user_id: ObjectId, result: AnomalyResult, action: &str) -> AnomalyResult {
        if result.risk_score >= AUDIT_THRESHOLD {
            metrics::incr(&metrics::SUSPICIOUS_ACTIVITY_TOTAL);
            self.audit.log(
                AuditEvent::new(
                    AuditEventType::SecuritySuspiciousActivity,
                    action,
                    "anomaly",
                    AuditResult::Partial,
                )
                .user(user_id)
                .extra(doc! { "reasons": result.reasons.clone() })
                .risk(result.risk_score as i32),
            );
        }
        if result.risk_score >= ALERT_THRESHOLD {
            self.alert.raise(Some(user_id), result.risk_score, &result.reasons);
        }
        result
    }

    /// High-value order anomaly over the user's recent order history.
    pub async fn check_order_anomaly(
        &self,
        user_id: ObjectId,
        amount_minor: i64,
        shipping_address: Option<&str>,
    ) -> AnomalyResult {
        let result = self
            .order_anomaly_inner(user_id, amount_minor, shipping_address)
            .await
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "order anomaly scoring failed; degrading to not anomalous");
                AnomalyResult::not_anomalous()
            });
        self.finish(user_id, result, "high_value_order")
    }

    async fn order_anomaly_inner(
        &self,
        user_id: ObjectId,
        amount_minor: i64,
        shipping_address: Option<&str>,
    ) -> Result<AnomalyResult, anyhow::Error> {
        let options = mongodb::options::FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .limit(10)
            .build();
        let recent: Vec<Order> = self
            .db
            .orders()
            .find(doc! { "user_id": user_id }, options)
            .await?
            .try_collect()
            .await?;

        let totals: Vec<i64> = recent.iter().map(|o| o.total).collect();
        let unseen_address = match shipping_address {
            Some(addr) => !recent
                .iter()
                .any(|o| o.shipping_address.as_deref() == Some(addr)),
            None => false,
        };

        let (score, reasons) = score_high_value_order(amount_minor, &totals, unseen_address);
        let recommendations = if score >= AUDIT_THRESHOLD {
            vec!["hold for manual review".to_string()]
        } else {
            Vec::new()
        };
        Ok(AnomalyResult::from_score(score, reasons, recommendations))
    }

    /// Burst detection on order creation.
    pub async fn check_rapid_orders(&self, user_id: ObjectId) -> AnomalyResult {
        let result = self
            .rapid_orders_inner(user_id)
            .await
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "rapid-order scoring failed; degrading to not anomalous");
                AnomalyResult::not_anomalous()
            });
        self.finish(user_id, result, "rapid_order_creation")
    }

    async fn rapid_orders_inner(&self, user_id: ObjectId) -> Result<AnomalyResult, anyhow::Error> {
        let now = Utc::now();
        let hour_ago = DateTime::from_chrono(now - Duration::hours(1));
        let day_ago = DateTime::from_chrono(now - Duration::hours(24));

        let hourly = self
            .db
            .orders()
            .count_documents(
                doc! { "user_id": user_id, "created_at": { "$gte": hour_ago } },
                None,
            )
            .await?;
        let daily = self
            .db
            .orders()
            .count_documents(
                doc! { "user_id": user_id, "created_at": { "$gte": day_ago } },
                None,
            )
            .await?;

        let (score, reasons) = score_rapid_orders(hourly, daily);
        Ok(AnomalyResult::from_score(score, reasons, Vec::new()))
    }

    /// Failed-login pattern over the audit trail: per-account, per-IP, and
    /// brute-force timing.
    pub async fn check_failed_login_pattern(
        &self,
        user_id: Option<ObjectId>,
        ip: &str,
    ) -> AnomalyResult {
        let result = self
            .failed_login_inner(user_id, ip)
            .await
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "failed-login scoring failed; degrading to not anomalous");
                AnomalyResult::not_anomalous()
            });
        if let Some(user_id) = user_id {
            self.finish(user_id, result, "failed_login_pattern")
        } else {
            result
        }
    }

    async fn failed_login_inner(
        &self,
        user_id: Option<ObjectId>,
        ip: &str,
    ) -> Result<AnomalyResult, anyhow::Error> {
        let now = Utc::now();
        let quarter_hour_ago = DateTime::from_chrono(now - Duration::minutes(15));
        let hour_ago = DateTime::from_chrono(now - Duration::hours(1));
        let failed = doc! { "event_type": AuditEventType::SecurityFailedLogin.as_str() };

        let by_user = match user_id {
            Some(uid) => {
                let mut filter = failed.clone();
                filter.insert("user_id", uid);
                filter.insert("timestamp", doc! { "$gte": quarter_hour_ago.clone() });
                self.db.audit_logs().count_documents(filter, None).await?
            }
            None => 0,
        };

        let mut ip_filter = failed.clone();
        ip_filter.insert("metadata.ip", ip);
        ip_filter.insert("timestamp", doc! { "$gte": quarter_hour_ago });
        let by_ip = self.db.audit_logs().count_documents(ip_filter, None).await?;

        #[derive(serde::Deserialize)]
        struct TimestampOnly {
            timestamp: DateTime,
        }

        let mut hour_filter = failed;
        hour_filter.insert("metadata.ip", ip);
        hour_filter.insert("timestamp", doc! { "$gte": hour_ago });
        let options = mongodb::options::FindOptions::builder()
            .sort(doc! { "timestamp": 1 })
            .projection(doc! { "timestamp": 1 })
            .build();
        let attempts: Vec<TimestampOnly> = self
            .db
            .audit_logs()
            .clone_with_type::<TimestampOnly>()
            .find(hour_filter, options)
            .await?
            .try_collect()
            .await?;
        let timestamps: Vec<i64> = attempts
            .iter()
            .map(|e| e.timestamp.to_chrono().timestamp())
            .collect();

        let (score, reasons) = score_failed_logins(by_user, by_ip, &timestamps);
        Ok(AnomalyResult::from_score(score, reasons, Vec::new()))
    }

    /// Payment fraud signals over the last 24 hours of audit events.
    pub async fn check_payment_fraud(
        &self,
        user_id: ObjectId,
        amount_minor: i64,
    ) -> AnomalyResult {
        let result = self
            .payment_fraud_inner(user_id, amount_minor)
            .await
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "payment fraud scoring failed; degrading to not anomalous");
                AnomalyResult::not_anomalous()
            });
        self.finish(user_id, result, "payment_fraud")
    }

    async fn payment_fraud_inner(
        &self,
        user_id: ObjectId,
        amount_minor: i64,
    ) -> Result<AnomalyResult, anyhow::Error> {
        let day_ago = DateTime::from_chrono(Utc::now() - Duration::hours(24));
        let payment_events = doc! {
            "user_id": user_id,
            "timestamp": { "$gte": day_ago.clone() },
            "event_type": { "$in": [
                AuditEventType::PaymentInitiated.as_str(),
                AuditEventType::PaymentCompleted.as_str(),
                AuditEventType::PaymentFailed.as_str(),
                AuditEventType::PaymentRefunded.as_str(),
            ] },
        };

        let failed = self
            .db
            .audit_logs()
            .count_documents(
                doc! {
                    "user_id": user_id,
                    "timestamp": { "$gte": day_ago },
                    "event_type": AuditEventType::PaymentFailed.as_str(),
                },
                None,
            )
            .await?;

        let total_events = self
            .db
            .audit_logs()
            .count_documents(payment_events.clone(), None)
            .await?;

        let distinct_ips = self
            .db
            .audit_logs()
            .distinct("metadata.ip", payment_events, None)
            .await?
            .into_iter()
            .filter(|b| !matches!(b, Bson::Null))
            .count() as u64;

        let (score, reasons) =
            score_payment_fraud(failed, amount_minor, total_events, distinct_ips);
        Ok(AnomalyResult::from_score(score, reasons, Vec::new()))
    }

    /// Combined gate for payment-intent creation: payment-fraud signals,
    /// the high-value order anomaly, and order-creation bursts, capped at
    /// 100.
    pub async fn payment_gate_score(
        &self,
        user_id: ObjectId,
        amount_minor: i64,
        shipping_address: Option<&str>,
    ) -> AnomalyResult {
        let fraud = self.check_payment_fraud(user_id, amount_minor).await;
        let order = self
            .check_order_anomaly(user_id, amount_minor, shipping_address)
            .await;
        let rapid = self.check_rapid_orders(user_id).await;

        let score = (fraud.risk_score + order.risk_score + rapid.risk_score).min(100);
        let mut reasons = fraud.reasons;
        reasons.extend(order.reasons);
        reasons.extend(rapid.reasons);

        AnomalyResult {
            is_anomalous: score >= AUDIT_THRESHOLD,
            risk_score: score,
            reasons,
            recommendations: if score >= PAYMENT_GATE_THRESHOLD {
                vec!["reject and hold for review".to_string()]
            } else {
                Vec::new()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_large_order_scores_first_order_and_magnitude_rules() {
        let (score, reasons) = score_high_value_order(15_000_00, &[], false);
        // +50 first order over threshold, +25 very high value
        assert_eq!(score, 75);
        assert_eq!(reasons.len(), 2);
    }

    #[test]
    fn triple_average_plus_unseen_address_scores_70() {
        let history = vec![100_00, 120_00, 80_00];
        let (score, _) = score_high_value_order(1_200_00, &history, true);
        // avg 100_00, 12x -> +40; unseen address on >1000 order -> +30
        assert_eq!(score, 70);
    }

    #[test]
    fn ordinary_order_scores_zero() {
        let history = vec![100_00, 120_00, 80_00];
        let (score, reasons) = score_high_value_order(110_00, &history, false);
        assert_eq!(score, 0);
        assert!(reasons.is_empty());
    }

    #[test]
    fn rapid_order_thresholds() {
        assert_eq!(score_rapid_orders(5, 5).0, 0);
        assert_eq!(score_rapid_orders(6, 5).0, 70);
        assert_eq!(score_rapid_orders(2, 21).0, 50);
        assert_eq!(score_rapid_orders(6, 21).0, 120);
    }

    #[test]
    fn failed_login_thresholds() {
        assert_eq!(score_failed_logins(5, 10, &[]).0, 0);
        assert_eq!(score_failed_logins(6, 0, &[]).0, 60);
        assert_eq!(score_failed_logins(0, 11, &[]).0, 70);
    }

    #[test]
    fn brute_force_timing_detected_on_tight_bursts() {
        // 12 attempts, 2 seconds apart
        let timestamps: Vec<i64> = (0..12).map(|i| 1_700_000_000 + i * 2).collect();
        let (score, reasons) = score_failed_logins(0, 0, &timestamps);
        assert_eq!(score, 80);
        assert!(reasons[0].contains("brute-force"));
    }

    #[test]
    fn slow_attempts_do_not_trip_timing_rule() {
        // 12 attempts, 5 minutes apart
        let timestamps: Vec<i64> = (0..12).map(|i| 1_700_000_000 + i * 300).collect();
        let (score, _) = score_failed_logins(0, 0, &timestamps);
        assert_eq!(score, 0);
    }

    #[test]
    fn payment_fraud_combination() {
        assert_eq!(score_payment_fraud(0, 100_00, 0, 0).0, 0);
        assert_eq!(score_payment_fraud(4, 100_00, 0, 0).0, 50);
        assert_eq!(score_payment_fraud(0, 6_000_00, 0, 0).0, 20);
        assert_eq!(score_payment_fraud(0, 100_00, 11, 0).0, 40);
        assert_eq!(score_payment_fraud(0, 100_00, 0, 6).0, 30);
        // Everything at once: 50+20+40+30
        assert_eq!(score_payment_fraud(4, 6_000_00, 11, 6).0, 140);
    }

    #[test]
    fn result_caps_score_at_100() {
        let result = AnomalyResult::from_score(140, vec![], vec![]);
        assert_eq!(result.risk_score, 100);
        assert!(result.is_anomalous);
    }
}
