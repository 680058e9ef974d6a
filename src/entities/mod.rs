//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod app_setting;
pub mod audit_log;
pub mod email_log;
pub mod equipment_item;
pub mod labor_item;
pub mod line_item_approval;
pub mod material_item;
pub mod project;
pub mod subcontractor_item;
pub mod tnm_ticket;

// Re-export specific types to avoid conflicts
pub use app_setting::{Column as AppSettingColumn, Entity as AppSetting, Model as AppSettingModel};
pub use audit_log::{Column as AuditLogColumn, Entity as AuditLog, Model as AuditLogModel};
pub use email_log::{Column as EmailLogColumn, Entity as EmailLog, Model as EmailLogModel};
pub use equipment_item::{
    Column as EquipmentItemColumn, Entity as EquipmentItem, Model as EquipmentItemModel,
};
pub use labor_item::{
    Column as LaborItemColumn, Entity as LaborItem, LaborType, Model as LaborItemModel,
};
pub use line_item_approval::{
    ApprovalStatus, Column as LineItemApprovalColumn, Entity as LineItemApproval,
    Model as LineItemApprovalModel,
};
pub use material_item::{
    Column as MaterialItemColumn, Entity as MaterialItem, Model as MaterialItemModel,
};
pub use project::{Column as ProjectColumn, Entity as Project, Model as ProjectModel};
pub use subcontractor_item::{
    Column as SubcontractorItemColumn, Entity as SubcontractorItem, Model as SubcontractorItemModel,
};
pub use tnm_ticket::{
    Column as TnmTicketColumn, Entity as TnmTicket, Model as TnmTicketModel, TicketStatus,
};
