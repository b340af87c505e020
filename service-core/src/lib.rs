//! Shared core for the commerce backend services.
//!
//! Carries the pieces every service needs the same way: the error sum and
//! its HTTP mapping, response security headers, HMAC signature utilities,
//! logging bootstrap, and environment configuration helpers.

pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod utils;

pub use error::AppError;
