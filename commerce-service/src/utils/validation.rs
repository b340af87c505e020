use axum::{
    extract::{FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use service_core::error::AppError;
use validator::Validate;

/// JSON extractor that runs the DTO's validators and rejects with the
/// standard error envelope.
pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::Validation(format!("Invalid request body: {}", e.body_text())))?;

        value.validate()?;

        Ok(ValidatedJson(value))
    }
}

/// 24-hex document id check for id-bearing fields.
pub fn is_object_id(value: &str) -> bool {
    value.len() == 24 && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Validator-compatible wrapper for DTO fields.
pub fn validate_object_id(value: &str) -> Result<(), validator::ValidationError> {
    if is_object_id(value) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("object_id"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_id_shape() {
        assert!(is_object_id("507f1f77bcf86cd799439011"));
        assert!(is_object_id("507F1F77BCF86CD799439011"));
        assert!(!is_object_id("507f1f77bcf86cd79943901")); // 23 chars
        assert!(!is_object_id("507f1f77bcf86cd7994390111")); // 25 chars
        assert!(!is_object_id("507f1f77bcf86cd79943901g")); // non-hex
        assert!(!is_object_id(""));
    }
}
