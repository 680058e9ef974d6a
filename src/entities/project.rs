//! Project entity - The parent of TNM tickets.
//!
//! A project carries the General Contractor contact info plus the per-project
//! override columns for OH&P percentages and reminder policy. Override columns
//! are nullable; a NULL means "inherit from the global setting".

use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Project database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "projects")]
pub struct Model {
    /// Unique identifier for the project
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Human-readable project name
    pub name: String,
    /// External job number, unique across projects
    #[sea_orm(unique)]
    pub project_number: String,
    /// Customer company name
    pub customer_company: Option<String>,
    /// General Contractor company name
    pub gc_company: Option<String>,
    /// GC email address - the recipient for RFCO approval emails
    pub gc_email: Option<String>,
    /// GC contact person
    pub gc_contact_name: Option<String>,
    pub gc_phone: Option<String>,
    /// Material OH&P override percent (NULL = inherit global default)
    pub material_ohp_percent: Option<Decimal>,
    /// Labor OH&P override percent (NULL = inherit global default)
    pub labor_ohp_percent: Option<Decimal>,
    /// Equipment OH&P override percent (NULL = inherit global default)
    pub equipment_ohp_percent: Option<Decimal>,
    /// Subcontractor OH&P override percent (NULL = inherit global default)
    pub subcontractor_ohp_percent: Option<Decimal>,
    /// Days between reminder emails (NULL = inherit global default)
    pub reminder_interval_days: Option<i32>,
    /// Maximum reminder count, 0 = unlimited (NULL = inherit global default)
    pub reminder_max_retries: Option<i32>,
    /// Approval link lifetime in hours (NULL = inherit global default)
    pub approval_token_expiration_hours: Option<i32>,
    /// Whether this project is active
    pub is_active: bool,
    pub notes: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between Project and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One project has many TNM tickets
    #[sea_orm(has_many = "super::tnm_ticket::Entity")]
    TnmTickets,
}

impl Related<super::tnm_ticket::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TnmTickets.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
