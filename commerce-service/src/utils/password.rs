use rand::Rng;

/// Special characters accepted by the password policy.
const SPECIAL_CHARS: &str = "!@#$%^&*()_+-=[]{}|;:'\",.<>/?";

/// Validate the password policy: at least 12 characters with lowercase,
/// uppercase, a digit, and a special character.
pub fn validate_password_policy(password: &str) -> Result<(), String> {
    if password.len() < 12 {
        return Err("Password must be at least 12 characters".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err("Password must include a lowercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err("Password must include an uppercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("Password must include a digit".to_string());
    }
    if !password.chars().any(|c| SPECIAL_CHARS.contains(c)) {
        return Err("Password must include a special character".to_string());
    }
    Ok(())
}

pub fn hash_password(password: &str) -> Result<String, anyhow::Error> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// Whether the candidate password matches any retained previous hash.
pub fn matches_history(password: &str, history: &[String]) -> bool {
    history.iter().any(|hash| verify_password(password, hash))
}

/// 64-hex random token for email verification, password reset, and the 2FA
/// temp token.
pub fn generate_random_token() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_accepts_a_compliant_password() {
        assert!(validate_password_policy("Passw0rd!Secret").is_ok());
    }

    #[test]
    fn policy_rejects_each_missing_class() {
        assert!(validate_password_policy("Short1!a").is_err()); // too short
        assert!(validate_password_policy("PASSW0RD!SECRET").is_err()); // no lower
        assert!(validate_password_policy("passw0rd!secret").is_err()); // no upper
        assert!(validate_password_policy("Password!Secret").is_err()); // no digit
        assert!(validate_password_policy("Passw0rdSecret1").is_err()); // no special
    }

    #[test]
    fn hash_and_verify_roundtrip() {
        let hash = hash_password("Passw0rd!Secret").unwrap();
        assert!(hash.starts_with("$2"));
        assert!(verify_password("Passw0rd!Secret", &hash));
        assert!(!verify_password("wrong-password", &hash));
    }

    #[test]
    fn history_detects_reuse() {
        let old = hash_password("Old-Passw0rd!1").unwrap();
        let history = vec![old];
        assert!(matches_history("Old-Passw0rd!1", &history));
        assert!(!matches_history("New-Passw0rd!2", &history));
        assert!(!matches_history("anything", &[]));
    }

    #[test]
    fn random_tokens_are_64_hex_and_unique() {
        let a = generate_random_token();
        let b = generate_random_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
