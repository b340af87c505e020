//! Payment-intent gating and webhook processing.

use mongodb::bson::{doc, oid::ObjectId, DateTime};
use serde::Serialize;
use std::sync::Arc;

use crate::db::MongoDb;
use crate::models::{
    AuditEventType, AuditMetadata, AuditResult, Order, OrderItem, OrderStatus, Product, User,
};
use crate::services::anomaly::{AnomalyService, PAYMENT_GATE_THRESHOLD};
use crate::services::audit::{AuditEvent, AuditService};
use crate::services::email::EmailProvider;
use crate::services::error::ServiceError;
use crate::services::stripe::StripeClient;

/// Response for a created intent.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentResponse {
    pub order_id: String,
    pub payment_intent_id: String,
    pub client_secret: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: String,
}

#[derive(Clone)]
pub struct PaymentService {
    db: MongoDb,
    audit: AuditService,
    anomaly: AnomalyService,
    stripe: StripeClient,
    email: Arc<dyn EmailProvider>,
}

impl PaymentService {
    pub fn new(
        db: MongoDb,
        audit: AuditService,
        anomaly: AnomalyService,
        stripe: StripeClient,
        email: Arc<dyn EmailProvider>,
    ) -> Self {
        Self {
            db,
            audit,
            anomaly,
            stripe,
            email,
        }
    }

    /// Create a payment intent for a set of items.
    ///
    /// Prices are always loaded server-side; the DTO layer has already
    /// rejected any client-supplied amount fields. Fraud scoring gates the
    /// call before the provider is contacted.
    pub async fn create_intent(
        &self,
        user: &User,
        items: Vec<(ObjectId, u32)>,
        metadata: AuditMetadata,
    ) -> Result<IntentResponse, ServiceError> {
        if items.is_empty() {
            return Err(ServiceError::Validation("Order has no items".to_string()));
        }
        if items.len() > 50 {
            return Err(ServiceError::Validation(
                "Order cannot have more than 50 items".to_string(),
            ));
        }

        // Load and check products.
        let ids: Vec<ObjectId> = items.iter().map(|(id, _)| *id).collect();
        let mut cursor = self
            .db
            .products()
            .find(doc! { "_id": { "$in": &ids } }, None)
            .await?;
        let mut products: Vec<Product> = Vec::new();
        while cursor.advance().await? {
            products.push(cursor.deserialize_current()?);
        }

        let mut order_items = Vec::with_capacity(items.len());
        let mut currency: Option<String> = None;
        for (product_id, quantity) in &items {
            let product = products
                .iter()
                .find(|p| p.id == *product_id)
                .ok_or_else(|| {
                    ServiceError::Validation(format!("Unknown product: {}", product_id.to_hex()))
                })?;
            if !product.active {
                return Err(ServiceError::Validation(format!(
                    "Product is not available: {}",
                    product.name
                )));
            }
            currency.get_or_insert_with(|| product.currency.clone());
            order_items.push(OrderItem {
                product_id: product.id,
                name: product.name.clone(),
                unit_price: product.price,
                quantity: *quantity,
            });
        }
        let currency = currency.unwrap_or_else(|| "USD".to_string());

        let order = Order::new(user.id, order_items, currency.clone());
        if order.total <= 0 {
            return Err(ServiceError::Validation(
                "Order total must be positive".to_string(),
            ));
        }

        // Fraud gate before any side effects with the provider.
        let verdict = self
            .anomaly
            .payment_gate_score(user.id, order.total, None)
            .await;
        if verdict.risk_score >= PAYMENT_GATE_THRESHOLD {
            self.audit.log(
                AuditEvent::new(
                    AuditEventType::SecurityFraudDetected,
                    "payment_intent_blocked",
                    "payment",
                    AuditResult::Failure,
                )
                .user(user.id)
                .metadata(metadata.clone())
                .extra(doc! { "reasons": verdict.reasons.clone(), "amount": order.total })
                .risk(verdict.risk_score as i32),
            );
            return Err(ServiceError::FraudBlocked);
        }

        self.db.orders().insert_one(&order, None).await?;
        self.audit.log(
            AuditEvent::new(
                AuditEventType::OrderCreated,
                "order_created",
                "order",
                AuditResult::Success,
            )
            .user(user.id)
            .resource_id(order.id.to_hex())
            .metadata(metadata.clone()),
        );
        self.audit.log(
            AuditEvent::new(
                AuditEventType::PaymentInitiated,
                "payment_intent_created",
                "payment",
                AuditResult::Success,
            )
            .user(user.id)
            .resource_id(order.id.to_hex())
            .metadata(metadata)
            .extra(doc! { "amount": order.total, "currency": &currency }),
        );

        let intent = self
            .stripe
            .create_payment_intent(
                order.total,
                &currency,
                &order.id.to_hex(),
                &user.id.to_hex(),
            )
            .await
            .map_err(|e| ServiceError::Provider(e.to_string()))?;

        self.db
            .orders()
            .update_one(
                doc! { "_id": order.id },
                doc! { "$set": {
                    "payment_intent_id": &intent.id,
                    "client_secret": intent.client_secret.as_deref(),
                    "status": OrderStatus::Processing.as_str(),
                    "updated_at": DateTime::now(),
                } },
                None,
            )
            .await?;

        Ok(IntentResponse {
            order_id: order.id.to_hex(),
            payment_intent_id: intent.id,
            client_secret: intent.client_secret,
            amount: order.total,
            currency,
            status: OrderStatus::Processing.as_str().to_string(),
        })
    }

    /// Process a provider webhook. The caller has already read the raw,
    /// size-capped body; the signature MUST verify before any branching on
    /// content.
    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<(), ServiceError> {
        let valid = self
            .stripe
            .verify_webhook_signature(payload, signature_header)
            .map_err(|e| ServiceError::Provider(e.to_string()))?;
        if !valid {
            tracing::warn!("Webhook signature verification failed");
            return Err(ServiceError::Provider(
                "invalid webhook signature".to_string(),
            ));
        }

        let event = self
            .stripe
            .parse_webhook_event(payload)
            .map_err(|e| ServiceError::Provider(e.to_string()))?;

        match event.event_type.as_str() {
            "payment_intent.succeeded" => self.on_payment_succeeded(&event.data.object).await,
            "payment_intent.payment_failed" => self.on_payment_failed(&event.data.object).await,
            other => {
                tracing::debug!(event_type = %other, "Ignoring webhook event type");
                Ok(())
            }
        }
    }

    async fn find_order_for_intent(
        &self,
        intent_id: &str,
    ) -> Result<Option<Order>, ServiceError> {
        Ok(self
            .db
            .orders()
            .find_one(doc! { "payment_intent_id": intent_id }, None)
            .await?)
    }

    async fn on_payment_succeeded(
        &self,
        intent: &crate::services::stripe::PaymentIntent,
    ) -> Result<(), ServiceError> {
        let Some(order) = self.find_order_for_intent(&intent.id).await? else {
            tracing::warn!(intent_id = %intent.id, "Webhook for unknown payment intent");
            return Ok(());
        };

        self.db
            .orders()
            .update_one(
                doc! { "_id": order.id },
                doc! { "$set": {
                    "status": OrderStatus::Paid.as_str(),
                    "updated_at": DateTime::now(),
                } },
                None,
            )
            .await?;

        self.audit.log(
            AuditEvent::new(
                AuditEventType::PaymentCompleted,
                "payment_succeeded",
                "payment",
                AuditResult::Success,
            )
            .user(order.user_id)
            .resource_id(order.id.to_hex())
            .extra(doc! { "payment_intent_id": &intent.id, "amount": order.total }),
        );

        // Clear the cart; failure here is not the provider's problem.
        if let Err(err) = self
            .db
            .carts()
            .delete_one(doc! { "user_id": order.user_id }, None)
            .await
        {
            tracing::warn!(error = %err, user_id = %order.user_id, "Failed to clear cart");
        }

        if let Ok(Some(user)) = self.db.find_user_by_id(&order.user_id).await {
            if let Err(err) = self
                .email
                .send_order_confirmation(
                    &user.email,
                    &order.id.to_hex(),
                    order.total,
                    &order.currency,
                )
                .await
            {
                tracing::warn!(error = %err, "Failed to send order confirmation email");
            }
        }

        tracing::info!(order_id = %order.id, "Order marked paid");
        Ok(())
    }

    async fn on_payment_failed(
        &self,
        intent: &crate::services::stripe::PaymentIntent,
    ) -> Result<(), ServiceError> {
        let Some(order) = self.find_order_for_intent(&intent.id).await? else {
            tracing::warn!(intent_id = %intent.id, "Webhook for unknown payment intent");
            return Ok(());
        };

        self.db
            .orders()
            .update_one(
                doc! { "_id": order.id },
                doc! { "$set": {
                    "status": OrderStatus::Cancelled.as_str(),
                    "updated_at": DateTime::now(),
                } },
                None,
            )
            .await?;

        let provider_message = intent
            .last_payment_error
            .as_ref()
            .and_then(|e| e.message.clone())
            .unwrap_or_else(|| "payment failed".to_string());

        self.audit.log(
            AuditEvent::new(
                AuditEventType::PaymentFailed,
                "payment_failed",
                "payment",
                AuditResult::Failure,
            )
            .user(order.user_id)
            .resource_id(order.id.to_hex())
            .error(provider_message)
            .extra(doc! { "payment_intent_id": &intent.id }),
        );

        tracing::info!(order_id = %order.id, "Order cancelled after failed payment");
        Ok(())
    }
}
