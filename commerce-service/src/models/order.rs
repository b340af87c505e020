use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

/// Order line with the server-side authoritative unit price in minor units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ObjectId,
    pub name: String,
    /// Minor units (cents); clients never supply this.
    pub unit_price: i64,
    pub quantity: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Paid,
    Shipped,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user_id: ObjectId,
    pub items: Vec<OrderItem>,
    /// Minor units; always the sum of `unit_price * quantity`.
    pub total: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub payment_intent_id: Option<String>,
    pub client_secret: Option<String>,
    pub shipping_address: Option<String>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Order {
    pub fn new(user_id: ObjectId, items: Vec<OrderItem>, currency: String) -> Self {
        let total = items
            .iter()
            .map(|i| i.unit_price * i.quantity as i64)
            .sum();
        let now = DateTime::now();
        Self {
            id: ObjectId::new(),
            user_id,
            items,
            total,
            currency,
            status: OrderStatus::Pending,
            payment_intent_id: None,
            client_secret: None,
            shipping_address: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_is_derived_from_items() {
        let order = Order::new(
            ObjectId::new(),
            vec![
                OrderItem {
                    product_id: ObjectId::new(),
                    name: "widget".to_string(),
                    unit_price: 1250,
                    quantity: 2,
                },
                OrderItem {
                    product_id: ObjectId::new(),
                    name: "gadget".to_string(),
                    unit_price: 999,
                    quantity: 1,
                },
            ],
            "USD".to_string(),
        );
        assert_eq!(order.total, 3499);
        assert_eq!(order.status, OrderStatus::Pending);
    }
}
