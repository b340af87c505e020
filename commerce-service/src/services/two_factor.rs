use rand::Rng;
use totp_rs::{Algorithm, Secret as TotpSecret, TOTP};

use crate::services::crypto::SecretCipher;

const TOTP_DIGITS: usize = 6;
const TOTP_STEP: u64 = 30;
/// One step of clock skew tolerated either side.
const TOTP_SKEW: u8 = 1;
const BACKUP_CODE_COUNT: usize = 10;

/// Result of starting 2FA setup. The base32 secret and the backup codes are
/// returned exactly once; only the ciphertext and the bcrypt hashes are
/// stored, so neither is recomputable server-side after commit.
#[derive(Debug)]
pub struct TwoFactorSetup {
    pub encrypted_secret: String,
    pub otpauth_url: String,
    pub backup_codes: Vec<String>,
    pub backup_code_hashes: Vec<String>,
}

#[derive(Clone)]
pub struct TwoFactorService {
    cipher: SecretCipher,
    issuer: String,
}

impl TwoFactorService {
    pub fn new(cipher: SecretCipher, issuer: impl Into<String>) -> Self {
        Self {
            cipher,
            issuer: issuer.into(),
        }
    }

    fn totp_for(&self, secret_base32: &str, account: &str) -> Result<TOTP, anyhow::Error> {
        let secret = TotpSecret::Encoded(secret_base32.to_string())
            .to_bytes()
            .map_err(|e| anyhow::anyhow!("Invalid TOTP secret: {:?}", e))?;

        TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW,
            TOTP_STEP,
            secret,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| anyhow::anyhow!("Failed to build TOTP: {}", e))
    }

    /// Generate a fresh secret and backup codes for enrollment.
    pub fn generate_setup(&self, account: &str) -> Result<TwoFactorSetup, anyhow::Error> {
        let secret_base32 = TotpSecret::generate_secret().to_encoded().to_string();
        let totp = self.totp_for(&secret_base32, account)?;
        let encrypted_secret = self.cipher.encrypt(&secret_base32)?;
        let (backup_codes, backup_code_hashes) = generate_backup_codes()?;

        Ok(TwoFactorSetup {
            encrypted_secret,
            otpauth_url: totp.get_url(),
            backup_codes,
            backup_code_hashes,
        })
    }

    /// Verify a 6-digit TOTP code against the stored (encrypted) secret.
    pub fn verify_totp(
        &self,
        encrypted_secret: &str,
        account: &str,
        code: &str,
    ) -> Result<bool, anyhow::Error> {
        if code.len() != TOTP_DIGITS || !code.chars().all(|c| c.is_ascii_digit()) {
            return Ok(false);
        }

        let secret_base32 = self.cipher.decrypt(encrypted_secret)?;
        let totp = self.totp_for(&secret_base32, account)?;
        Ok(totp.check_current(code).unwrap_or(false))
    }

    #[cfg(test)]
    pub fn current_code(&self, encrypted_secret: &str, account: &str) -> String {
        let secret_base32 = self.cipher.decrypt(encrypted_secret).unwrap();
        let totp = self.totp_for(&secret_base32, account).unwrap();
        totp.generate_current().unwrap()
    }
}

/// Generate backup codes: plaintext for the one-shot response, bcrypt
/// hashes for storage.
pub fn generate_backup_codes() -> Result<(Vec<String>, Vec<String>), anyhow::Error> {
    let mut rng = rand::thread_rng();
    let mut codes = Vec::with_capacity(BACKUP_CODE_COUNT);
    let mut hashes = Vec::with_capacity(BACKUP_CODE_COUNT);

    for _ in 0..BACKUP_CODE_COUNT {
        let bytes: [u8; 4] = rng.gen();
        let code = hex::encode(bytes);
        let hash = bcrypt::hash(&code, bcrypt::DEFAULT_COST)
            .map_err(|e| anyhow::anyhow!("Failed to hash backup code: {}", e))?;
        codes.push(code);
        hashes.push(hash);
    }

    Ok((codes, hashes))
}

/// Match a presented backup code against the stored hashes. Returns the
/// index of the matching hash so the caller can consume it.
pub fn match_backup_code(hashes: &[String], code: &str) -> Option<usize> {
    hashes
        .iter()
        .position(|hash| bcrypt::verify(code, hash).unwrap_or(false))
}
