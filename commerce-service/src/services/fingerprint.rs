use axum::http::HeaderMap;
use isbot::Bots;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// UA substrings of HTTP clients, headless browsers, and scraping
/// frameworks. A policy knob; the weights around it are fixed.
static AUTOMATION_UA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(curl|wget|python-requests|python-urllib|go-http-client|okhttp|java/|libwww|httpclient|axios|node-fetch|scrapy|selenium|phantomjs|headless|puppeteer|playwright|bot|crawler|spider)",
    )
    .expect("automation UA regex must compile")
});

/// Request signals that feed fingerprinting and automation detection.
#[derive(Debug, Clone, Default)]
pub struct ClientSignals {
    pub ip: String,
    pub tls_info: Option<String>,
    pub user_agent: Option<String>,
    pub accept: Option<String>,
    pub accept_language: Option<String>,
    pub accept_encoding: Option<String>,
    pub sec_fetch_site: Option<String>,
    pub sec_fetch_mode: Option<String>,
    pub sec_fetch_dest: Option<String>,
    pub connection: Option<String>,
}

impl ClientSignals {
    pub fn from_headers(headers: &HeaderMap, ip: String) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };

        Self {
            ip,
            // Populated by the TLS terminator when present.
            tls_info: get("x-tls-fingerprint"),
            user_agent: get("user-agent"),
            accept: get("accept"),
            accept_language: get("accept-language"),
            accept_encoding: get("accept-encoding"),
            sec_fetch_site: get("sec-fetch-site"),
            sec_fetch_mode: get("sec-fetch-mode"),
            sec_fetch_dest: get("sec-fetch-dest"),
            connection: get("connection"),
        }
    }

    fn has_sec_fetch(&self) -> bool {
        self.sec_fetch_site.is_some()
            || self.sec_fetch_mode.is_some()
            || self.sec_fetch_dest.is_some()
    }
}

/// Automation verdict with the signals that contributed.
#[derive(Debug, Clone)]
pub struct AutomationCheck {
    pub is_automated: bool,
    /// 0-100.
    pub confidence: u32,
    pub reasons: Vec<String>,
}

/// Device fingerprinting and client automation heuristics.
#[derive(Clone)]
pub struct FingerprintService {
    bots: Arc<Bots>,
}

impl Default for FingerprintService {
    fn default() -> Self {
        Self::new()
    }
}

impl FingerprintService {
    pub fn new() -> Self {
        Self {
            bots: Arc::new(Bots::default()),
        }
    }

    /// SHA-256 over the ordered signal bundle, absent values encoded as the
    /// literal `none`. Broader than UA+IP so a stolen token replayed from a
    /// dissimilar client fails, while pure IP drift at the same UA does not
    /// change every other component.
    pub fn enhanced_fingerprint(&self, signals: &ClientSignals) -> String {
        let part = |v: &Option<String>| v.clone().unwrap_or_else(|| "none".to_string());
        let material = format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            signals.ip,
            part(&signals.tls_info),
            part(&signals.user_agent),
            part(&signals.accept_language),
            part(&signals.accept_encoding),
            part(&signals.sec_fetch_site),
            part(&signals.sec_fetch_mode),
            part(&signals.sec_fetch_dest),
        );
        hex::encode(Sha256::digest(material.as_bytes()))
    }

    /// Pre-enhanced-scheme fingerprint: SHA-256 of `userAgent:ip`. Grace
    /// path only; new tokens always bind the enhanced form.
    pub fn legacy_fingerprint(&self, user_agent: &str, ip: &str) -> String {
        hex::encode(Sha256::digest(format!("{}:{}", user_agent, ip).as_bytes()))
    }

    /// Weighted automation score over the request signals.
    pub fn detect_automation(&self, signals: &ClientSignals) -> AutomationCheck {
        let mut score: u32 = 0;
        let mut reasons = Vec::new();

        match signals.user_agent.as_deref() {
            None | Some("") => {
                score += 40;
                reasons.push("missing user-agent".to_string());
            }
            Some(ua) => {
                if AUTOMATION_UA.is_match(ua) || self.bots.is_bot(ua) {
                    score += 35;
                    reasons.push("user-agent matches known automation client".to_string());
                }
            }
        }

        if signals.accept_language.is_none() {
            score += 15;
            reasons.push("missing accept-language".to_string());
        }

        if signals.accept.as_deref() == Some("*/*") {
            score += 10;
            reasons.push("generic accept header".to_string());
        }

        if signals.accept_encoding.is_none() {
            score += 10;
            reasons.push("missing accept-encoding".to_string());
        }

        if !signals.has_sec_fetch() {
            score += 15;
            reasons.push("no sec-fetch headers".to_string());

            let browser_like = signals
                .user_agent
                .as_deref()
                .map(|ua| ua.starts_with("Mozilla/"))
                .unwrap_or(false);
            if browser_like {
                score += 20;
                reasons.push("browser-like user-agent without sec-fetch headers".to_string());
            }
        }

        if signals
            .connection
            .as_deref()
            .map(|c| c.eq_ignore_ascii_case("close"))
            .unwrap_or(false)
        {
            score += 5;
            reasons.push("connection: close".to_string());
        }

        AutomationCheck {
            is_automated: score >= 50,
            confidence: score.min(100),
            reasons,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn browser_signals() -> ClientSignals {
        ClientSignals {
            ip: "203.0.113.10".to_string(),
            tls_info: None,
            user_agent: Some(
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 Chrome/120.0 Safari/537.36"
                    .to_string(),
            ),
            accept: Some("text/html,application/json".to_string()),
            accept_language: Some("en-US,en;q=0.9".to_string()),
            accept_encoding: Some("gzip, deflate, br".to_string()),
            sec_fetch_site: Some("same-origin".to_string()),
            sec_fetch_mode: Some("cors".to_string()),
            sec_fetch_dest: Some("empty".to_string()),
            connection: None,
        }
    }

    fn python_requests_signals() -> ClientSignals {
        ClientSignals {
            ip: "203.0.113.10".to_string(),
            tls_info: None,
            user_agent: Some("python-requests/2.31".to_string()),
            accept: Some("*/*".to_string()),
            accept_language: None,
            accept_encoding: Some("gzip, deflate".to_string()),
            sec_fetch_site: None,
            sec_fetch_mode: None,
            sec_fetch_dest: None,
            connection: None,
        }
    }

    #[test]
    fn enhanced_fingerprint_is_stable_and_ordered() {
        let service = FingerprintService::new();
        let signals = browser_signals();
        let a = service.enhanced_fingerprint(&signals);
        let b = service.enhanced_fingerprint(&signals);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn missing_values_encode_as_none_literal() {
        let service = FingerprintService::new();
        let empty = ClientSignals {
            ip: "1.2.3.4".to_string(),
            ..Default::default()
        };
        let expected = hex::encode(Sha256::digest(
            b"1.2.3.4|none|none|none|none|none|none|none",
        ));
        assert_eq!(service.enhanced_fingerprint(&empty), expected);
    }

    #[test]
    fn fingerprint_changes_with_user_agent() {
        let service = FingerprintService::new();
        let browser = browser_signals();
        let mut scripted = browser.clone();
        scripted.user_agent = Some("python-requests/2.31".to_string());
        assert_ne!(
            service.enhanced_fingerprint(&browser),
            service.enhanced_fingerprint(&scripted)
        );
    }

    #[test]
    fn legacy_fingerprint_shape() {
        let service = FingerprintService::new();
        let expected = hex::encode(Sha256::digest(b"Mozilla/5.0:203.0.113.10"));
        assert_eq!(
            service.legacy_fingerprint("Mozilla/5.0", "203.0.113.10"),
            expected
        );
    }

    #[test]
    fn real_browser_is_not_automated() {
        let service = FingerprintService::new();
        let check = service.detect_automation(&browser_signals());
        assert!(!check.is_automated, "reasons: {:?}", check.reasons);
        assert!(check.confidence < 50);
    }

    #[test]
    fn python_requests_scores_high() {
        let service = FingerprintService::new();
        let check = service.detect_automation(&python_requests_signals());
        assert!(check.is_automated);
        // +35 UA, +15 lang, +10 accept, +15 sec-fetch
        assert!(check.confidence >= 70, "confidence {}", check.confidence);
    }

    #[test]
    fn missing_user_agent_scores_40_plus_header_penalties() {
        let service = FingerprintService::new();
        let signals = ClientSignals {
            ip: "1.2.3.4".to_string(),
            ..Default::default()
        };
        let check = service.detect_automation(&signals);
        // +40 UA, +15 lang, +10 encoding, +15 sec-fetch
        assert!(check.is_automated);
        assert_eq!(check.confidence, 80);
    }

    #[test]
    fn browser_ua_without_sec_fetch_gets_extra_weight() {
        let service = FingerprintService::new();
        let mut signals = browser_signals();
        signals.sec_fetch_site = None;
        signals.sec_fetch_mode = None;
        signals.sec_fetch_dest = None;
        let check = service.detect_automation(&signals);
        // +15 missing sec-fetch, +20 browser-like without them
        assert_eq!(check.confidence, 35);
        assert!(!check.is_automated);
    }

    #[test]
    fn confidence_is_capped_at_100() {
        let service = FingerprintService::new();
        let signals = ClientSignals {
            ip: "1.2.3.4".to_string(),
            user_agent: Some("Mozilla/5.0 compatible; Googlebot/2.1 headless".to_string()),
            accept: Some("*/*".to_string()),
            connection: Some("close".to_string()),
            ..Default::default()
        };
        let check = service.detect_automation(&signals);
        assert!(check.confidence <= 100);
        assert!(check.is_automated);
    }
}
