//! Application setting entity - global key/value configuration.
//!
//! Settings live in the database after first boot; environment variables are
//! only the bootstrap fallback. Values are stored as strings and coerced via
//! `typed_value()` according to the row's `data_type`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::settings::SettingValue;

/// Global application setting database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "app_settings")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    /// Setting key (e.g. "DEFAULT_LABOR_OHP")
    #[sea_orm(unique)]
    pub key: String,
    /// Value stored as string, coerced on read
    pub value: String,
    /// Logical section: company, smtp, rates, ohp, reminders, approval, other
    pub category: String,
    pub description: Option<String>,
    /// One of: string, integer, float, boolean
    pub data_type: String,
    /// Who last changed the setting, if known
    pub updated_by: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl Model {
    /// Coerces the stored string value according to `data_type`.
    ///
    /// Booleans accept the usual truthy spellings; numeric parse failures
    /// fall back to the raw string rather than erroring.
    #[must_use]
    pub fn typed_value(&self) -> SettingValue {
        SettingValue::coerce(&self.value, &self.data_type)
    }
}

/// `AppSetting` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
