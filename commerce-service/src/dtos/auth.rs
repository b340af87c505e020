use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    // The full character-class policy is enforced by the service; the DTO
    // only pre-checks length so the error wording stays in one place.
    #[validate(length(min = 12, message = "Password must be at least 12 characters"))]
    pub password: String,

    #[validate(length(max = 100, message = "Name too long"))]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyEmailRequest {
    #[validate(length(equal = 64, message = "Invalid token"))]
    pub token: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResendVerificationRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,

    #[validate(length(max = 128))]
    pub device_id: Option<String>,

    #[validate(length(max = 128))]
    pub device_name: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Login2faRequest {
    #[validate(length(equal = 64, message = "Invalid token"))]
    pub temp_token: String,

    /// 6-digit TOTP or 8-hex backup code.
    #[validate(length(min = 6, max = 8, message = "Invalid code"))]
    pub code: String,

    #[validate(length(max = 128))]
    pub device_id: Option<String>,

    #[validate(length(max = 128))]
    pub device_name: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ForgotPasswordRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ValidateResetTokenRequest {
    #[validate(length(equal = 64, message = "Invalid token"))]
    pub token: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    #[validate(length(equal = 64, message = "Invalid token"))]
    pub token: String,

    #[validate(length(min = 12, message = "Password must be at least 12 characters"))]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,

    #[validate(length(min = 12, message = "Password must be at least 12 characters"))]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TwoFactorCodeRequest {
    #[validate(length(min = 6, max = 8, message = "Invalid code"))]
    pub code: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TwoFactorDisableRequest {
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,

    #[validate(length(min = 6, max = 8, message = "Invalid code"))]
    pub code: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RevokeSessionRequest {
    #[validate(custom = "crate::utils::validation::validate_object_id")]
    pub session_id: String,
}

/// 200 response asking the client to complete the 2FA challenge.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorChallengeResponse {
    pub requires_two_factor: bool,
    pub temp_token: String,
}

/// 403 response body for unverified accounts.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailVerificationRequiredResponse {
    pub requires_email_verification: bool,
    pub email: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_request_accepts_camel_case_device_fields() {
        let req: LoginRequest = serde_json::from_str(
            r#"{"email":"a@b.c","password":"x","deviceId":"d1","deviceName":"laptop"}"#,
        )
        .unwrap();
        assert_eq!(req.device_id.as_deref(), Some("d1"));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn register_request_validates_email_and_length() {
        let req: RegisterRequest =
            serde_json::from_str(r#"{"email":"not-an-email","password":"Passw0rd!Secret"}"#)
                .unwrap();
        assert!(req.validate().is_err());

        let req: RegisterRequest =
            serde_json::from_str(r#"{"email":"a@b.c","password":"short"}"#).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn revoke_session_requires_object_id_shape() {
        let req: RevokeSessionRequest =
            serde_json::from_str(r#"{"sessionId":"507f1f77bcf86cd799439011"}"#).unwrap();
        assert!(req.validate().is_ok());

        let req: RevokeSessionRequest =
            serde_json::from_str(r#"{"sessionId":"not-hex"}"#).unwrap();
        assert!(req.validate().is_err());
    }
}
