use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

/// Catalog product, read-only from this service's perspective. The catalog
/// itself is managed elsewhere; the payment path only needs the
/// authoritative price and the active flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    /// Minor units (cents).
    pub price: i64,
    pub currency: String,
    #[serde(default = "default_active")]
    pub active: bool,
    pub created_at: DateTime,
}

fn default_active() -> bool {
    true
}
