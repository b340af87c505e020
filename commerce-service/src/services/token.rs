use base64::engine::{general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use service_core::utils::signature::constant_time_eq;
use std::fs;
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::models::User;

/// Access-token claims. Bound to a device fingerprint and the user's
/// token version so both replay-from-elsewhere and replay-after-password-
/// change fail verification downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: String,
    pub email: String,
    pub role: String,
    #[serde(rename = "tokenVersion")]
    pub token_version: i64,
    pub fingerprint: String,
    pub ip: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// Refresh-token claims. Carries the rotation family, not a session id;
/// the server-side record is looked up by token hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    pub sub: String,
    pub family: String,
    #[serde(rename = "tokenVersion")]
    pub token_version: i64,
    #[serde(rename = "type")]
    pub token_type: String,
    pub iat: i64,
    pub exp: i64,
}

/// Single opaque verification failure. Callers never learn which check
/// rejected the token.
#[derive(Debug, thiserror::Error)]
#[error("invalid token")]
pub struct InvalidToken;

/// Signs and verifies both token classes with separate RS256 key pairs.
#[derive(Clone)]
pub struct TokenService {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_expiry_secs: i64,
    refresh_expiry_secs: i64,
}

impl TokenService {
    /// Load both RS256 key pairs from the configured PEM paths.
    pub fn new(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        let read = |path: &str| -> Result<String, anyhow::Error> {
            fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("Failed to read key from {}: {}", path, e))
        };

        let access_encoding =
            EncodingKey::from_rsa_pem(read(&config.access_private_key_path)?.as_bytes())
                .map_err(|e| anyhow::anyhow!("Failed to parse access private key: {}", e))?;
        let access_decoding =
            DecodingKey::from_rsa_pem(read(&config.access_public_key_path)?.as_bytes())
                .map_err(|e| anyhow::anyhow!("Failed to parse access public key: {}", e))?;
        let refresh_encoding =
            EncodingKey::from_rsa_pem(read(&config.refresh_private_key_path)?.as_bytes())
                .map_err(|e| anyhow::anyhow!("Failed to parse refresh private key: {}", e))?;
        let refresh_decoding =
            DecodingKey::from_rsa_pem(read(&config.refresh_public_key_path)?.as_bytes())
                .map_err(|e| anyhow::anyhow!("Failed to parse refresh public key: {}", e))?;

        tracing::info!("Token service initialized with RS256 key pairs");

        Ok(Self {
            access_encoding,
            access_decoding,
            refresh_encoding,
            refresh_decoding,
            access_expiry_secs: config.access_expiry_secs,
            refresh_expiry_secs: config.refresh_expiry_secs,
        })
    }

    pub fn access_expiry_secs(&self) -> i64 {
        self.access_expiry_secs
    }

    pub fn refresh_expiry_secs(&self) -> i64 {
        self.refresh_expiry_secs
    }

    /// Sign a short-lived access token with a fresh `jti`.
    pub fn sign_access(
        &self,
        user: &User,
        fingerprint: &str,
        ip: &str,
    ) -> Result<String, anyhow::Error> {
        let now = Utc::now();
        let claims = AccessTokenClaims {
            sub: user.id.to_hex(),
            email: user.email.clone(),
            role: user.role.as_str().to_string(),
            token_version: user.token_version,
            fingerprint: fingerprint.to_string(),
            ip: ip.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(self.access_expiry_secs)).timestamp(),
        };

        encode(&Header::new(Algorithm::RS256), &claims, &self.access_encoding)
            .map_err(|e| anyhow::anyhow!("Failed to encode access token: {}", e))
    }

    /// Sign a refresh token for a rotation family.
    pub fn sign_refresh(&self, user: &User, family: &str) -> Result<String, anyhow::Error> {
        let now = Utc::now();
        let claims = RefreshTokenClaims {
            sub: user.id.to_hex(),
            family: family.to_string(),
            token_version: user.token_version,
            token_type: "refresh".to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(self.refresh_expiry_secs)).timestamp(),
        };

        encode(
            &Header::new(Algorithm::RS256),
            &claims,
            &self.refresh_encoding,
        )
        .map_err(|e| anyhow::anyhow!("Failed to encode refresh token: {}", e))
    }

    /// Verify an access token.
    ///
    /// The header is parsed and gated on `alg == "RS256"` before any
    /// cryptographic work, so `none` and HMAC-confusion tokens are rejected
    /// structurally. When `expected_fingerprint` is given, the bound claim
    /// must match it (constant-time).
    pub fn verify_access(
        &self,
        token: &str,
        expected_fingerprint: Option<&str>,
    ) -> Result<AccessTokenClaims, InvalidToken> {
        check_header_alg(token)?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = true;

        let data = decode::<AccessTokenClaims>(token, &self.access_decoding, &validation)
            .map_err(|_| InvalidToken)?;
        let claims = data.claims;

        if claims.sub.is_empty() || claims.email.is_empty() || claims.role.is_empty() {
            return Err(InvalidToken);
        }

        if let Some(expected) = expected_fingerprint {
            if !constant_time_eq(claims.fingerprint.as_bytes(), expected.as_bytes()) {
                return Err(InvalidToken);
            }
        }

        Ok(claims)
    }

    /// Verify a refresh token: same header gate, refresh public key,
    /// `type == "refresh"` asserted.
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshTokenClaims, InvalidToken> {
        check_header_alg(token)?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = true;

        let data = decode::<RefreshTokenClaims>(token, &self.refresh_decoding, &validation)
            .map_err(|_| InvalidToken)?;
        let claims = data.claims;

        if claims.token_type != "refresh" || claims.sub.is_empty() || claims.family.is_empty() {
            return Err(InvalidToken);
        }

        Ok(claims)
    }
}

/// Structural pre-check: exactly three segments, a parseable base64url JSON
/// header, and `alg` exactly `RS256`. `none` (any casing) is rejected here
/// even though the signature check would also fail it.
fn check_header_alg(token: &str) -> Result<(), InvalidToken> {
    let mut segments = token.split('.');
    let header_segment = segments.next().ok_or(InvalidToken)?;
    let (Some(_), Some(_), None) = (segments.next(), segments.next(), segments.next()) else {
        return Err(InvalidToken);
    };

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_segment)
        .map_err(|_| InvalidToken)?;
    let header: serde_json::Value =
        serde_json::from_slice(&header_bytes).map_err(|_| InvalidToken)?;

    match header.get("alg").and_then(|v| v.as_str()) {
        Some(alg) if alg.eq_ignore_ascii_case("none") => Err(InvalidToken),
        Some("RS256") => Ok(()),
        _ => Err(InvalidToken),
    }
}

/// SHA-256 hex of the raw token bytes; the storage key for refresh sessions.
pub fn hash_token(token: &str) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const ACCESS_PRIVATE_KEY: &str = include_str!("../../tests/keys/access_private.pem");
    const ACCESS_PUBLIC_KEY: &str = include_str!("../../tests/keys/access_public.pem");
    const REFRESH_PRIVATE_KEY: &str = include_str!("../../tests/keys/refresh_private.pem");
    const REFRESH_PUBLIC_KEY: &str = include_str!("../../tests/keys/refresh_public.pem");

    fn write_temp(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    struct KeyFiles {
        _files: Vec<NamedTempFile>,
        config: JwtConfig,
    }

    fn key_files() -> KeyFiles {
        let files = vec![
            write_temp(ACCESS_PRIVATE_KEY),
            write_temp(ACCESS_PUBLIC_KEY),
            write_temp(REFRESH_PRIVATE_KEY),
            write_temp(REFRESH_PUBLIC_KEY),
        ];
        let config = JwtConfig {
            access_private_key_path: files[0].path().to_str().unwrap().to_string(),
            access_public_key_path: files[1].path().to_str().unwrap().to_string(),
            refresh_private_key_path: files[2].path().to_str().unwrap().to_string(),
            refresh_public_key_path: files[3].path().to_str().unwrap().to_string(),
            access_expiry_secs: 900,
            refresh_expiry_secs: 604800,
        };
        KeyFiles {
            _files: files,
            config,
        }
    }

    fn test_user() -> User {
        User::new("alice@example.com".to_string(), "hash".to_string(), None)
    }

    #[test]
    fn access_token_roundtrip_preserves_claims() {
        let keys = key_files();
        let service = TokenService::new(&keys.config).unwrap();
        let user = test_user();

        let token = service.sign_access(&user, "fp-abc", "203.0.113.10").unwrap();
        let claims = service.verify_access(&token, None).unwrap();

        assert_eq!(claims.sub, user.id.to_hex());
        assert_eq!(claims.email, "alice@example.com");
        assert_eq!(claims.role, "user");
        assert_eq!(claims.fingerprint, "fp-abc");
        assert_eq!(claims.ip, "203.0.113.10");
        assert_eq!(claims.token_version, 0);
        assert!(!claims.jti.is_empty());
    }

    #[test]
    fn fingerprint_mismatch_is_rejected() {
        let keys = key_files();
        let service = TokenService::new(&keys.config).unwrap();
        let token = service
            .sign_access(&test_user(), "fp-abc", "203.0.113.10")
            .unwrap();

        assert!(service.verify_access(&token, Some("fp-abc")).is_ok());
        assert!(service.verify_access(&token, Some("fp-other")).is_err());
    }

    #[test]
    fn alg_none_token_is_rejected() {
        let keys = key_files();
        let service = TokenService::new(&keys.config).unwrap();

        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"alice","role":"admin"}"#);
        let forged = format!("{}.{}.", header, payload);

        assert!(service.verify_access(&forged, None).is_err());
        assert!(service.verify_refresh(&forged).is_err());
    }

    #[test]
    fn non_rs256_algorithms_are_rejected_at_the_header() {
        let keys = key_files();
        let service = TokenService::new(&keys.config).unwrap();

        for alg in ["HS256", "HS384", "HS512", "RS384", "ES256", "None", "NONE"] {
            let header =
                URL_SAFE_NO_PAD.encode(format!(r#"{{"alg":"{}","typ":"JWT"}}"#, alg).as_bytes());
            let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"alice"}"#);
            let forged = format!("{}.{}.sig", header, payload);
            assert!(
                service.verify_access(&forged, None).is_err(),
                "alg {} must be rejected",
                alg
            );
        }

        // Missing alg entirely
        let header = URL_SAFE_NO_PAD.encode(br#"{"typ":"JWT"}"#);
        let forged = format!("{}.e30.sig", header);
        assert!(service.verify_access(&forged, None).is_err());
    }

    #[test]
    fn structural_check_requires_three_segments() {
        let keys = key_files();
        let service = TokenService::new(&keys.config).unwrap();

        assert!(service.verify_access("onlyonesegment", None).is_err());
        assert!(service.verify_access("two.segments", None).is_err());
        assert!(service.verify_access("a.b.c.d", None).is_err());
    }

    #[test]
    fn key_separation_refresh_signed_token_fails_access_verification() {
        let keys = key_files();
        let service = TokenService::new(&keys.config).unwrap();
        let user = test_user();

        let refresh = service.sign_refresh(&user, "family-1").unwrap();
        assert!(service.verify_access(&refresh, None).is_err());

        let access = service.sign_access(&user, "fp", "ip").unwrap();
        assert!(service.verify_refresh(&access).is_err());
    }

    #[test]
    fn refresh_token_carries_type_and_family() {
        let keys = key_files();
        let service = TokenService::new(&keys.config).unwrap();
        let user = test_user();

        let token = service.sign_refresh(&user, "family-42").unwrap();
        let claims = service.verify_refresh(&token).unwrap();
        assert_eq!(claims.token_type, "refresh");
        assert_eq!(claims.family, "family-42");
        assert_eq!(claims.sub, user.id.to_hex());
    }

    #[test]
    fn hash_token_is_sha256_hex() {
        // SHA-256 of "abc"
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(hash_token("abc").len(), 64);
        assert_ne!(hash_token("abc"), hash_token("abd"));
    }
}
