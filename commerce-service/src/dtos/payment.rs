use serde::Deserialize;
use validator::Validate;

/// Payment-intent creation body.
///
/// Unknown fields are rejected at deserialization: `amount`, `currency`,
/// `price`, `total`, `discount`, and anything else a client might use to
/// influence pricing never reaches the handler. Prices come from the
/// catalog, period.
#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct CreateIntentRequest {
    /// Item count bounds (1..=50) are enforced by the payment service.
    #[validate]
    pub items: Vec<IntentItem>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct IntentItem {
    #[validate(custom = "crate::utils::validation::validate_object_id")]
    pub product_id: String,

    #[validate(range(min = 1, max = 100, message = "Quantity must be between 1 and 100"))]
    pub quantity: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_request_passes() {
        let req: CreateIntentRequest = serde_json::from_str(
            r#"{"items":[{"productId":"507f1f77bcf86cd799439011","quantity":2}]}"#,
        )
        .unwrap();
        assert!(req.validate().is_ok());
    }

    #[test]
    fn client_supplied_amount_is_rejected_at_parse_time() {
        for body in [
            r#"{"items":[{"productId":"507f1f77bcf86cd799439011","quantity":1}],"amount":1}"#,
            r#"{"items":[{"productId":"507f1f77bcf86cd799439011","quantity":1}],"currency":"USD"}"#,
            r#"{"items":[{"productId":"507f1f77bcf86cd799439011","quantity":1}],"total":0}"#,
            r#"{"items":[{"productId":"507f1f77bcf86cd799439011","quantity":1}],"discount":99}"#,
        ] {
            let err = serde_json::from_str::<CreateIntentRequest>(body).unwrap_err();
            assert!(err.to_string().contains("unknown field"), "{}", err);
        }
    }

    #[test]
    fn item_level_price_fields_are_rejected() {
        let err = serde_json::from_str::<CreateIntentRequest>(
            r#"{"items":[{"productId":"507f1f77bcf86cd799439011","quantity":1,"price":1}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn quantity_bounds_are_validated() {
        let req: CreateIntentRequest = serde_json::from_str(
            r#"{"items":[{"productId":"507f1f77bcf86cd799439011","quantity":0}]}"#,
        )
        .unwrap();
        assert!(req.validate().is_err());

        let req: CreateIntentRequest = serde_json::from_str(
            r#"{"items":[{"productId":"507f1f77bcf86cd799439011","quantity":101}]}"#,
        )
        .unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn malformed_product_id_is_rejected() {
        let req: CreateIntentRequest =
            serde_json::from_str(r#"{"items":[{"productId":"dropped-table","quantity":1}]}"#)
                .unwrap();
        assert!(req.validate().is_err());
    }
}
