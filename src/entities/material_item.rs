//! Material line item entity - costed as quantity x unit price.

use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Material line item database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "material_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Owning ticket (cascade delete)
    pub tnm_ticket_id: Uuid,
    pub description: String,
    pub quantity: Decimal,
    /// Unit of measure (e.g. "ea", "lf", "sqft")
    pub unit: Option<String>,
    pub unit_price: Decimal,
    pub line_order: i32,
    pub created_at: DateTimeUtc,
}

impl Model {
    /// Line subtotal: quantity x unit price.
    #[must_use]
    pub fn subtotal(&self) -> Decimal {
        self.quantity * self.unit_price
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
