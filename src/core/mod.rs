//! Core business logic - framework-agnostic workflow operations.
//!
//! Everything in here works against a `sea_orm::DatabaseConnection` and is
//! callable from any interface layer (HTTP handlers, the background worker,
//! tests). The modules mirror the workflow: settings resolution, totals,
//! ticket state machine, GC approval, tokens, line items, audit.

/// GC approval link verification and submission
pub mod approval;
/// Audit trail recording with structured change maps
pub mod audit;
/// Line item CRUD; every mutation recomputes ticket totals
pub mod line_items;
/// Project CRUD and override management
pub mod project;
/// Hierarchical settings resolution (ticket -> project -> global -> env)
pub mod settings;
/// Ticket lifecycle: create, send, status moves, manual override, payment
pub mod ticket;
/// Signed, time-boxed GC approval tokens
pub mod token;
/// Ticket totals recomputation with exact decimal arithmetic
pub mod totals;
