//! Email log entity - append-only audit of every send attempt.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Email log database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "email_log")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Ticket the email concerns, if any
    pub tnm_ticket_id: Option<Uuid>,
    pub to_email: String,
    pub from_email: String,
    pub subject: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    /// One of: initial_send, reminder, approval_confirmation
    pub email_type: String,
    /// One of: queued, sent, failed
    pub status: String,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTimeUtc>,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::tnm_ticket::Entity",
        from = "Column::TnmTicketId",
        to = "super::tnm_ticket::Column::Id",
        on_update = "NoAction",
        on_delete = "SetNull"
    )]
    TnmTicket,
}

impl Related<super::tnm_ticket::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TnmTicket.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
