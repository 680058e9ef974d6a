//! Labor line item entity.
//!
//! Labor is costed as hours x hourly rate; the rate is looked up from the
//! settings hierarchy by labor type when the caller does not supply one
//! explicitly.

use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Labor classification, used to look up the default hourly rate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum LaborType {
    #[sea_orm(string_value = "project_manager")]
    ProjectManager,
    #[sea_orm(string_value = "superintendent")]
    Superintendent,
    #[sea_orm(string_value = "carpenter")]
    Carpenter,
    #[sea_orm(string_value = "laborer")]
    Laborer,
}

impl LaborType {
    /// Settings key carrying the default hourly rate for this labor type.
    #[must_use]
    pub const fn rate_key(self) -> &'static str {
        match self {
            Self::ProjectManager => "RATE_PROJECT_MANAGER",
            Self::Superintendent => "RATE_SUPERINTENDENT",
            Self::Carpenter => "RATE_CARPENTER",
            Self::Laborer => "RATE_LABORER",
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProjectManager => "project_manager",
            Self::Superintendent => "superintendent",
            Self::Carpenter => "carpenter",
            Self::Laborer => "laborer",
        }
    }
}

/// Labor line item database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "labor_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Owning ticket (cascade delete)
    pub tnm_ticket_id: Uuid,
    pub description: String,
    /// Hours worked
    pub hours: Decimal,
    pub labor_type: LaborType,
    /// Hourly rate, resolved from settings at creation if not given
    pub rate_per_hour: Decimal,
    /// Display ordering within the ticket
    pub line_order: i32,
    pub created_at: DateTimeUtc,
}

impl Model {
    /// Line subtotal: hours x rate.
    #[must_use]
    pub fn subtotal(&self) -> Decimal {
        self.hours * self.rate_per_hour
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::tnm_ticket::Entity",
        from = "Column::TnmTicketId",
        to = "super::tnm_ticket::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    TnmTicket,
}

impl Related<super::tnm_ticket::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TnmTicket.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
