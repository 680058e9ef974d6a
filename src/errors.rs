//! Unified error types for the RFCO workflow.
//!
//! Errors are grouped so callers can distinguish the conditions that matter
//! at the boundary: not-found vs. state-conflict vs. token problems. The HTTP
//! layer maps each variant to a distinct response so the approval page can
//! render "expired" and "already responded" differently.

use rust_decimal::Decimal;
use thiserror::Error;

/// Application error type covering all failure modes of the workflow core.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Invalid amount: {amount}")]
    InvalidAmount { amount: Decimal },

    #[error("Project not found: {id}")]
    ProjectNotFound { id: String },

    #[error("Ticket not found: {id}")]
    TicketNotFound { id: String },

    #[error("Line item not found: {id}")]
    LineItemNotFound { id: String },

    /// Illegal workflow transition, e.g. sending an already-approved ticket
    /// or re-submitting a resolved approval.
    #[error("State conflict: {message}")]
    StateConflict { message: String },

    /// The presented approval token failed signature, type or payload checks,
    /// or no longer matches the ticket's stored token.
    #[error("Invalid approval token: {reason}")]
    TokenInvalid { reason: String },

    /// The approval token (embedded or stored expiry) has lapsed.
    #[error("Approval token has expired")]
    TokenExpired,

    #[error("Queue error: {message}")]
    Queue { message: String },

    #[error("Email delivery error: {message}")]
    Email { message: String },
}

// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
