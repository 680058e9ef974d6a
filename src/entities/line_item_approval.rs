//! Line item approval entity - one GC decision per line item.
//!
//! When the GC submits the approval form, each line item gets a row recording
//! the approve/deny decision, the amount approved, and any comment. The
//! per-item decisions aggregate into the ticket's final status.

use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// GC decision on a single line item.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "approved")]
    Approved,
    #[sea_orm(string_value = "denied")]
    Denied,
}

/// Line item approval database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "line_item_approvals")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Owning ticket (cascade delete)
    pub tnm_ticket_id: Uuid,
    /// Which item table the decision refers to: labor, material, equipment,
    /// subcontractor
    pub line_item_type: String,
    pub line_item_id: Uuid,
    pub status: ApprovalStatus,
    pub approved_amount: Option<Decimal>,
    pub gc_comment: Option<String>,
    pub approved_at: Option<DateTimeUtc>,
    /// Name the GC signed with (GCs are not system users)
    pub approved_by: Option<String>,
    pub created_at: DateTimeUtc,
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
