pub mod anomaly;
pub mod audit;
pub mod auth;
pub mod crypto;
pub mod email;
pub mod error;
pub mod failed_login;
pub mod fingerprint;
pub mod kv;
pub mod metrics;
pub mod payment;
pub mod rate_limit;
pub mod session;
pub mod stripe;
pub mod token;
pub mod two_factor;
pub mod vault;

pub use anomaly::{AnomalyResult, AnomalyService, LogAlertHook};
pub use audit::{AuditService, MemoryAuditStore, MongoAuditStore};
pub use auth::{AuthService, DeviceInfo, LoginOutcome, LoginSuccess};
pub use crypto::SecretCipher;
pub use email::{EmailProvider, MockEmailService, SmtpEmailService};
pub use error::ServiceError;
pub use failed_login::FailedLoginTracker;
pub use fingerprint::{AutomationCheck, ClientSignals, FingerprintService};
pub use kv::{DegradingKvStore, KvStore, MemoryKvStore, RedisKvStore};
pub use payment::PaymentService;
pub use rate_limit::{RateLimitDecision, RateLimitService};
pub use session::SessionStore;
pub use stripe::StripeClient;
pub use token::{AccessTokenClaims, TokenService};
pub use two_factor::TwoFactorService;
