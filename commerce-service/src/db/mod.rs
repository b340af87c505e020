//! MongoDB access layer: typed collections, index bootstrap, find helpers.

use mongodb::{
    bson::{doc, oid::ObjectId, Document},
    error::{Error, ErrorKind, WriteFailure},
    options::{ClientOptions, IndexOptions},
    Client, Collection, Database, IndexModel,
};

use crate::config::MongoConfig;
use crate::models::{AuditLogEntry, Order, Product, RefreshSession, User};

#[derive(Clone)]
pub struct MongoDb {
    client: Client,
    db: Database,
}

impl MongoDb {
    pub async fn connect(config: &MongoConfig) -> Result<Self, Error> {
        tracing::info!(database = %config.database, "Connecting to MongoDB");
        let mut options = ClientOptions::parse(&config.uri).await?;
        options.app_name = Some("commerce-service".to_string());
        let client = Client::with_options(options)?;
        let db = client.database(&config.database);
        Ok(Self { client, db })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn users(&self) -> Collection<User> {
        self.db.collection("users")
    }

    pub fn refresh_sessions(&self) -> Collection<RefreshSession> {
        self.db.collection("refresh_sessions")
    }

    pub fn audit_logs(&self) -> Collection<AuditLogEntry> {
        self.db.collection("audit_logs")
    }

    pub fn orders(&self) -> Collection<Order> {
        self.db.collection("orders")
    }

    pub fn products(&self) -> Collection<Product> {
        self.db.collection("products")
    }

    pub fn carts(&self) -> Collection<Document> {
        self.db.collection("carts")
    }

    /// Create the indexes the invariants rely on. Idempotent; runs at startup.
    pub async fn ensure_indexes(&self) -> Result<(), Error> {
        let unique = IndexOptions::builder().unique(true).build();

        self.users()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "email": 1 })
                    .options(unique.clone())
                    .build(),
                None,
            )
            .await?;

        // Uniqueness on the token hash is what turns a concurrent double
        // rotation into a write conflict instead of two live sessions.
        self.refresh_sessions()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "token_hash": 1 })
                    .options(unique)
                    .build(),
                None,
            )
            .await?;
        self.refresh_sessions()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "user_id": 1, "revoked": 1 })
                    .build(),
                None,
            )
            .await?;
        self.refresh_sessions()
            .create_index(IndexModel::builder().keys(doc! { "family": 1 }).build(), None)
            .await?;

        for keys in [
            doc! { "timestamp": 1 },
            doc! { "event_type": 1, "timestamp": 1 },
            doc! { "user_id": 1, "timestamp": 1 },
            doc! { "result": 1, "timestamp": 1 },
            doc! { "risk_score": 1, "timestamp": 1 },
        ] {
            self.audit_logs()
                .create_index(IndexModel::builder().keys(keys).build(), None)
                .await?;
        }

        self.orders()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "user_id": 1, "created_at": -1 })
                    .build(),
                None,
            )
            .await?;
        self.orders()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "payment_intent_id": 1 })
                    .build(),
                None,
            )
            .await?;

        tracing::info!("MongoDB indexes ensured");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), Error> {
        self.db.run_command(doc! { "ping": 1 }, None).await?;
        Ok(())
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, Error> {
        self.users()
            .find_one(doc! { "email": email.to_lowercase() }, None)
            .await
    }

    pub async fn find_user_by_id(&self, id: &ObjectId) -> Result<Option<User>, Error> {
        self.users().find_one(doc! { "_id": id }, None).await
    }

    pub async fn find_user_by_verification_token(
        &self,
        token: &str,
    ) -> Result<Option<User>, Error> {
        self.users()
            .find_one(doc! { "email_verification_token": token }, None)
            .await
    }

    pub async fn find_user_by_reset_token(&self, token: &str) -> Result<Option<User>, Error> {
        self.users()
            .find_one(doc! { "password_reset_token": token }, None)
            .await
    }

    pub async fn find_user_by_temp_token(&self, token: &str) -> Result<Option<User>, Error> {
        self.users()
            .find_one(doc! { "two_factor_temp_token": token }, None)
            .await
    }

    pub async fn find_session_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshSession>, Error> {
        self.refresh_sessions()
            .find_one(doc! { "token_hash": token_hash }, None)
            .await
    }
}

/// Whether a Mongo write failed on a unique-index conflict (code 11000).
pub fn is_duplicate_key_error(err: &Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(we)) => we.code == 11000,
        ErrorKind::BulkWrite(bw) => bw
            .write_errors
            .as_ref()
            .map(|errs| errs.iter().any(|we| we.code == 11000))
            .unwrap_or(false),
        ErrorKind::Command(ce) => ce.code == 11000,
        _ => false,
    }
}
