use prometheus::{Encoder, IntCounter, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Security-relevant gap counters. Audit writes are best-effort by design,
/// so operators watch this counter to detect missing chain entries.
pub static AUDIT_WRITE_FAILURES: OnceLock<IntCounter> = OnceLock::new();
pub static FAILED_LOGINS_TOTAL: OnceLock<IntCounter> = OnceLock::new();
pub static RATE_LIMITED_TOTAL: OnceLock<IntCounter> = OnceLock::new();
pub static SUSPICIOUS_ACTIVITY_TOTAL: OnceLock<IntCounter> = OnceLock::new();

pub fn init_metrics() {
    let registry = Registry::new();

    let make = |name: &str, help: &str| {
        IntCounter::with_opts(Opts::new(name, help)).expect("metric opts are valid")
    };

    let audit_failures = make(
        "audit_write_failures_total",
        "Audit log writes that failed and were dropped",
    );
    let failed_logins = make("failed_logins_total", "Failed login attempts");
    let rate_limited = make("rate_limited_total", "Requests rejected by rate limiting");
    let suspicious = make(
        "suspicious_activity_total",
        "Events scored anomalous by fraud scoring",
    );

    for collector in [&audit_failures, &failed_logins, &rate_limited, &suspicious] {
        if let Err(e) = registry.register(Box::new(collector.clone())) {
            tracing::error!(error = %e, "Failed to register metrics collector");
        }
    }

    let _ = REGISTRY.set(registry);
    let _ = AUDIT_WRITE_FAILURES.set(audit_failures);
    let _ = FAILED_LOGINS_TOTAL.set(failed_logins);
    let _ = RATE_LIMITED_TOTAL.set(rate_limited);
    let _ = SUSPICIOUS_ACTIVITY_TOTAL.set(suspicious);
}

/// Increment a counter if metrics are initialized.
pub fn incr(counter: &OnceLock<IntCounter>) {
    if let Some(c) = counter.get() {
        c.inc();
    }
}

/// Render the registry in Prometheus text format.
pub fn get_metrics() -> String {
    let registry = match REGISTRY.get() {
        Some(r) => r,
        None => return "# metrics registry not initialized\n".to_string(),
    };

    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}
