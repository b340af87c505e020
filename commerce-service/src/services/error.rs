use service_core::error::AppError;
use thiserror::Error;

/// Internal error sum for the service layer.
///
/// Handlers convert this into `AppError` for the HTTP mapping; the
/// conversion is also where user-visible wording is decided, so auth flows
/// stay non-disclosing (wrong password and unknown email read the same).
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account temporarily locked")]
    AccountLocked,

    #[error("Too many failed login attempts")]
    LoginBlocked { retry_after: u64 },

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Invalid two-factor code")]
    InvalidTwoFactorCode,

    #[error("Email already registered")]
    EmailExists,

    #[error("User not found")]
    UserNotFound,

    #[error("Refresh already in progress")]
    RefreshInProgress,

    #[error("{0}")]
    PasswordPolicy(String),

    #[error("Password was used recently")]
    PasswordReuse,

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Payment blocked for review")]
    FraudBlocked,

    #[error("Provider error: {0}")]
    Provider(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Database(e) => AppError::Database(e),
            ServiceError::Internal(e) => AppError::Internal(e),
            // Same wording whether the email exists or the password is wrong.
            ServiceError::InvalidCredentials => {
                AppError::Auth("Invalid email or password".to_string())
            }
            ServiceError::AccountLocked => {
                AppError::Permission("Account is temporarily locked".to_string())
            }
            ServiceError::LoginBlocked { retry_after } => AppError::RateLimited {
                message: "Too many failed login attempts. Try again later.".to_string(),
                retry_after,
            },
            ServiceError::InvalidToken => {
                AppError::Auth("Invalid or expired token".to_string())
            }
            ServiceError::InvalidTwoFactorCode => {
                AppError::Auth("Invalid two-factor code".to_string())
            }
            ServiceError::EmailExists => {
                AppError::Conflict("Registration could not be completed".to_string())
            }
            ServiceError::UserNotFound => {
                AppError::Auth("Invalid or expired token".to_string())
            }
            ServiceError::RefreshInProgress => {
                AppError::Conflict("Refresh already in progress".to_string())
            }
            ServiceError::PasswordPolicy(msg) => AppError::Validation(msg),
            ServiceError::PasswordReuse => AppError::Validation(
                "Password was used recently; choose a different one".to_string(),
            ),
            ServiceError::Validation(msg) => AppError::Validation(msg),
            ServiceError::NotFound(msg) => AppError::NotFound(msg),
            ServiceError::FraudBlocked => AppError::FraudGate(
                "Payment could not be processed. Our team will review this order.".to_string(),
            ),
            ServiceError::Provider(msg) => AppError::Provider(msg),
        }
    }
}
