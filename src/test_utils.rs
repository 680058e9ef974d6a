//! Shared test utilities for `RfcoBuddy`.
//!
//! This module provides common helper functions for setting up test
//! databases and building test entities with sensible defaults. Builders
//! return plain models so individual tests can tweak fields before
//! inserting.

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, IntoActiveModel};
use uuid::Uuid;

use crate::{
    entities::{
        LaborType, TicketStatus, equipment_item, labor_item, material_item, project,
        subcontractor_item, tnm_ticket,
    },
    errors::Result,
};

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

fn short_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

/// Builds a project model with sensible defaults and a unique number.
/// All override columns start inherited (NULL).
#[must_use]
pub fn test_project() -> project::Model {
    let now = Utc::now();
    project::Model {
        id: Uuid::new_v4(),
        name: "Test Project".to_string(),
        project_number: format!("P-{}", short_id()),
        customer_company: Some("Test Customer".to_string()),
        gc_company: Some("Test GC".to_string()),
        gc_email: Some("gc@example.com".to_string()),
        gc_contact_name: Some("Pat Doyle".to_string()),
        gc_phone: None,
        material_ohp_percent: None,
        labor_ohp_percent: None,
        equipment_ohp_percent: None,
        subcontractor_ohp_percent: None,
        reminder_interval_days: None,
        reminder_max_retries: None,
        approval_token_expiration_hours: None,
        is_active: true,
        notes: None,
        created_at: now,
        updated_at: now,
    }
}

/// Builds a draft ticket for a project with zeroed totals and a unique
/// TNM number.
#[must_use]
pub fn test_ticket(proj: &project::Model) -> tnm_ticket::Model {
    let now = Utc::now();
    tnm_ticket::Model {
        id: Uuid::new_v4(),
        tnm_number: format!("TNM-{}-{}", proj.project_number, short_id()),
        rfco_number: None,
        project_id: proj.id,
        project_number: proj.project_number.clone(),
        title: "Test Change Order".to_string(),
        description: None,
        submitter_name: "Test Foreman".to_string(),
        submitter_email: "foreman@example.com".to_string(),
        proposal_date: now.date_naive(),
        response_date: None,
        due_date: None,
        status: TicketStatus::Draft,
        material_ohp_percent: None,
        labor_ohp_percent: None,
        equipment_ohp_percent: None,
        subcontractor_ohp_percent: None,
        rate_project_manager: None,
        rate_superintendent: None,
        rate_carpenter: None,
        rate_laborer: None,
        labor_subtotal: Decimal::ZERO,
        labor_total: Decimal::ZERO,
        total_labor_hours: Decimal::ZERO,
        material_subtotal: Decimal::ZERO,
        material_total: Decimal::ZERO,
        equipment_subtotal: Decimal::ZERO,
        equipment_total: Decimal::ZERO,
        subcontractor_subtotal: Decimal::ZERO,
        subcontractor_total: Decimal::ZERO,
        proposal_amount: Decimal::ZERO,
        approved_amount: Decimal::ZERO,
        email_sent_count: 0,
        last_email_sent_at: None,
        reminder_count: 0,
        last_reminder_sent_at: None,
        send_reminders_until_accepted: false,
        send_reminders_until_paid: false,
        approval_token: None,
        approval_token_expires_at: None,
        viewed_at: None,
        is_paid: 0,
        paid_date: None,
        paid_by: None,
        notes: None,
        created_at: now,
        updated_at: now,
    }
}

/// Builds a labor item model (1 hour of carpenter work at $50/h).
#[must_use]
pub fn test_labor_item(ticket_id: Uuid) -> labor_item::Model {
    labor_item::Model {
        id: Uuid::new_v4(),
        tnm_ticket_id: ticket_id,
        description: "Test labor".to_string(),
        hours: Decimal::ONE,
        labor_type: LaborType::Carpenter,
        rate_per_hour: Decimal::from(50),
        line_order: 0,
        created_at: Utc::now(),
    }
}

/// Builds a material item model (1 unit at $10).
#[must_use]
pub fn test_material_item(ticket_id: Uuid) -> material_item::Model {
    material_item::Model {
        id: Uuid::new_v4(),
        tnm_ticket_id: ticket_id,
        description: "Test material".to_string(),
        quantity: Decimal::ONE,
        unit: Some("ea".to_string()),
        unit_price: Decimal::from(10),
        line_order: 0,
        created_at: Utc::now(),
    }
}

/// Builds an equipment item model (1 unit at $100).
#[must_use]
pub fn test_equipment_item(ticket_id: Uuid) -> equipment_item::Model {
    equipment_item::Model {
        id: Uuid::new_v4(),
        tnm_ticket_id: ticket_id,
        description: "Test equipment".to_string(),
        quantity: Decimal::ONE,
        unit: Some("day".to_string()),
        unit_price: Decimal::from(100),
        line_order: 0,
        created_at: Utc::now(),
    }
}

/// Builds a subcontractor item model ($500 flat).
#[must_use]
pub fn test_subcontractor_item(ticket_id: Uuid) -> subcontractor_item::Model {
    subcontractor_item::Model {
        id: Uuid::new_v4(),
        tnm_ticket_id: ticket_id,
        description: "Test subcontractor work".to_string(),
        subcontractor_name: Some("Test Sub".to_string()),
        amount: Decimal::from(500),
        line_order: 0,
        created_at: Utc::now(),
    }
}

/// Inserts a prebuilt project model.
pub async fn insert_project(
    db: &DatabaseConnection,
    model: project::Model,
) -> Result<project::Model> {
    model
        .into_active_model()
        .reset_all()
        .insert(db)
        .await
        .map_err(Into::into)
}

/// Inserts a prebuilt ticket model.
pub async fn insert_ticket(
    db: &DatabaseConnection,
    model: tnm_ticket::Model,
) -> Result<tnm_ticket::Model> {
    model
        .into_active_model()
        .reset_all()
        .insert(db)
        .await
        .map_err(Into::into)
}

/// Inserts a prebuilt labor item model.
pub async fn insert_labor_item(
    db: &DatabaseConnection,
    model: labor_item::Model,
) -> Result<labor_item::Model> {
    model
        .into_active_model()
        .reset_all()
        .insert(db)
        .await
        .map_err(Into::into)
}

/// Sets up a complete test environment with a project and a draft ticket.
/// Returns (db, project, ticket) for common test scenarios.
pub async fn setup_with_ticket() -> Result<(
    DatabaseConnection,
    project::Model,
    tnm_ticket::Model,
)> {
    let db = setup_test_db().await?;
    let proj = insert_project(&db, test_project()).await?;
    let ticket = insert_ticket(&db, test_ticket(&proj)).await?;
    Ok((db, proj, ticket))
}
