//! Audit log entity - one row per recorded workflow action.
//!
//! The `changes` column holds a JSON-serialized map of
//! `{field: {old, new}}` with string-serialized scalar values, kept flat so
//! downstream consumers never have to walk nested structures.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Audit log database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "audit_log")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Entity kind: tnm_ticket, project, app_setting, ...
    pub entity_type: String,
    pub entity_id: Uuid,
    /// Action performed: create, send, view, approve, deny, mark_as_paid, ...
    pub action: String,
    /// Acting user, absent for GC actions (GCs are not system users)
    pub user_id: Option<String>,
    /// JSON change map: {field: {old, new}}
    pub changes: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTimeUtc,
}

/// `AuditLog` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
