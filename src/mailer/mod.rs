//! Outbound email seam.
//!
//! The worker renders content and hands a finished [`OutboundEmail`] to an
//! [`EmailTransport`]. Real SMTP lives behind this trait as an external
//! collaborator; the bundled [`LogOnlyTransport`] is the "sending disabled"
//! mode that logs the message and reports success, so every other part of
//! the pipeline (logging, tracking, scheduling) behaves identically with or
//! without a mail server.

/// Settings-driven subject/body rendering for the three email kinds
pub mod templates;

use async_trait::async_trait;
use tracing::warn;

use crate::errors::Result;

/// A fully rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: Option<String>,
}

/// SMTP transport collaborator. Implementations must be safe to call
/// concurrently from the worker pool.
#[async_trait]
pub trait EmailTransport: Send + Sync + std::fmt::Debug {
    /// Delivers one message. An `Err` marks the attempt failed and drives
    /// the worker's retry/backoff handling.
    async fn send(&self, email: &OutboundEmail) -> Result<()>;
}

/// Transport for deployments without SMTP configured: logs the message
/// and reports success.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyTransport;

#[async_trait]
impl EmailTransport for LogOnlyTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<()> {
        warn!(
            "SMTP disabled - would send email to {}: {}",
            email.to, email.subject
        );
        Ok(())
    }
}
