//! TNM ticket entity - The Time & Material change-order (RFCO) aggregate root.
//!
//! The ticket owns its line items and approval records (destroyed with it),
//! snapshots OH&P percentages from the project at creation, and carries all
//! workflow state: status, approval token, email/reminder tracking and
//! payment markers. The monetary total columns are always recomputed from the
//! current line-item set and are never edited independently.

use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Workflow status of a TNM ticket.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    #[sea_orm(string_value = "draft")]
    Draft,
    #[sea_orm(string_value = "pending_review")]
    PendingReview,
    #[sea_orm(string_value = "ready_to_send")]
    ReadyToSend,
    #[sea_orm(string_value = "sent")]
    Sent,
    #[sea_orm(string_value = "viewed")]
    Viewed,
    #[sea_orm(string_value = "partially_approved")]
    PartiallyApproved,
    #[sea_orm(string_value = "approved")]
    Approved,
    #[sea_orm(string_value = "denied")]
    Denied,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "paid")]
    Paid,
}

impl TicketStatus {
    /// Stable string form, used in audit change maps and log lines.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingReview => "pending_review",
            Self::ReadyToSend => "ready_to_send",
            Self::Sent => "sent",
            Self::Viewed => "viewed",
            Self::PartiallyApproved => "partially_approved",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Cancelled => "cancelled",
            Self::Paid => "paid",
        }
    }

    /// True once the GC has responded (approve/deny/partial).
    #[must_use]
    pub const fn is_resolved(self) -> bool {
        matches!(self, Self::Approved | Self::Denied | Self::PartiallyApproved)
    }

    /// True while the ticket sits with the GC awaiting a response.
    #[must_use]
    pub const fn is_awaiting_response(self) -> bool {
        matches!(self, Self::Sent | Self::Viewed)
    }

    /// True for statuses from which "send RFCO" is a legal transition.
    #[must_use]
    pub const fn can_send(self) -> bool {
        matches!(self, Self::ReadyToSend | Self::PendingReview)
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TNM ticket database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tnm_tickets")]
pub struct Model {
    /// Unique identifier for the ticket
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Sequential ticket number, unique (e.g. "TNM-1042-003")
    #[sea_orm(unique)]
    pub tnm_number: String,
    /// GC-assigned RFCO number, if any
    pub rfco_number: Option<String>,
    /// Parent project
    pub project_id: Uuid,
    /// Denormalized project number for display
    pub project_number: String,
    /// Short title of the change order
    pub title: String,
    pub description: Option<String>,
    /// Submitting foreman
    pub submitter_name: String,
    pub submitter_email: String,
    /// Date the proposal was prepared
    pub proposal_date: Date,
    /// Date the GC responded (set on approval/denial)
    pub response_date: Option<Date>,
    pub due_date: Option<Date>,
    /// Current workflow status
    pub status: TicketStatus,
    /// OH&P percentages, snapshotted from the project at creation so later
    /// default changes never reprice historical tickets
    pub material_ohp_percent: Option<Decimal>,
    pub labor_ohp_percent: Option<Decimal>,
    pub equipment_ohp_percent: Option<Decimal>,
    pub subcontractor_ohp_percent: Option<Decimal>,
    /// Labor rate overrides (NULL = use project/global defaults)
    pub rate_project_manager: Option<Decimal>,
    pub rate_superintendent: Option<Decimal>,
    pub rate_carpenter: Option<Decimal>,
    pub rate_laborer: Option<Decimal>,
    /// Calculated totals - always a function of line items + OH&P
    pub labor_subtotal: Decimal,
    pub labor_total: Decimal,
    pub total_labor_hours: Decimal,
    pub material_subtotal: Decimal,
    pub material_total: Decimal,
    pub equipment_subtotal: Decimal,
    pub equipment_total: Decimal,
    pub subcontractor_subtotal: Decimal,
    pub subcontractor_total: Decimal,
    /// Sum of the four category totals
    pub proposal_amount: Decimal,
    /// Amount the GC actually approved
    pub approved_amount: Decimal,
    /// Email tracking
    pub email_sent_count: i32,
    pub last_email_sent_at: Option<DateTimeUtc>,
    pub reminder_count: i32,
    pub last_reminder_sent_at: Option<DateTimeUtc>,
    /// Keep reminding until the GC accepts, ignoring the retry cap
    pub send_reminders_until_accepted: bool,
    /// Keep reminding until the ticket is paid, ignoring the retry cap
    pub send_reminders_until_paid: bool,
    /// Outstanding approval token; cleared on submission (single use)
    pub approval_token: Option<String>,
    pub approval_token_expires_at: Option<DateTimeUtc>,
    /// First time the GC opened the approval link
    pub viewed_at: Option<DateTimeUtc>,
    /// Payment tracking - 0 = not paid, 1 = paid
    pub is_paid: i32,
    pub paid_date: Option<DateTimeUtc>,
    pub paid_by: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between TnmTicket and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::project::Entity",
        from = "Column::ProjectId",
        to = "super::project::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Project,
    #[sea_orm(has_many = "super::labor_item::Entity")]
    LaborItems,
    #[sea_orm(has_many = "super::material_item::Entity")]
    MaterialItems,
    #[sea_orm(has_many = "super::equipment_item::Entity")]
    EquipmentItems,
    #[sea_orm(has_many = "super::subcontractor_item::Entity")]
    SubcontractorItems,
    #[sea_orm(has_many = "super::line_item_approval::Entity")]
    Approvals,
    #[sea_orm(has_many = "super::email_log::Entity")]
    EmailLogs,
}

impl Related<super::project::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Project.def()
    }
}

impl Related<super::labor_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LaborItems.def()
    }
}

impl Related<super::material_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MaterialItems.def()
    }
}

impl Related<super::equipment_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::EquipmentItems.def()
    }
}

impl Related<super::subcontractor_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SubcontractorItems.def()
    }
}

impl Related<super::line_item_approval::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Approvals.def()
    }
}

impl Related<super::email_log::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::EmailLogs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
