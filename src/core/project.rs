//! Project business logic.
//!
//! Projects parent the TNM tickets and carry the per-project override
//! columns consulted by the settings resolver. Updating an override never
//! reprices existing tickets - OH&P snapshots are taken at ticket creation.

use rust_decimal::Decimal;
use sea_orm::{QueryOrder, Set, prelude::*};
use uuid::Uuid;

use crate::{
    entities::{Project, project},
    errors::{Error, Result},
};

/// Input for creating a project.
#[derive(Debug, Clone)]
pub struct NewProject {
    pub name: String,
    pub project_number: String,
    pub customer_company: Option<String>,
    pub gc_company: Option<String>,
    pub gc_email: Option<String>,
    pub gc_contact_name: Option<String>,
    pub gc_phone: Option<String>,
}

/// Creates a new project with all override columns inherited (NULL).
pub async fn create_project(
    db: &DatabaseConnection,
    input: NewProject,
) -> Result<project::Model> {
    if input.name.trim().is_empty() {
        return Err(Error::Validation {
            message: "Project name cannot be empty".to_string(),
        });
    }
    if input.project_number.trim().is_empty() {
        return Err(Error::Validation {
            message: "Project number cannot be empty".to_string(),
        });
    }

    let now = chrono::Utc::now();
    let model = project::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(input.name.trim().to_string()),
        project_number: Set(input.project_number.trim().to_string()),
        customer_company: Set(input.customer_company),
        gc_company: Set(input.gc_company),
        gc_email: Set(input.gc_email),
        gc_contact_name: Set(input.gc_contact_name),
        gc_phone: Set(input.gc_phone),
        material_ohp_percent: Set(None),
        labor_ohp_percent: Set(None),
        equipment_ohp_percent: Set(None),
        subcontractor_ohp_percent: Set(None),
        reminder_interval_days: Set(None),
        reminder_max_retries: Set(None),
        approval_token_expiration_hours: Set(None),
        is_active: Set(true),
        notes: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    };

    model.insert(db).await.map_err(Into::into)
}

/// Finds a project by its unique ID.
pub async fn get_project_by_id(
    db: &DatabaseConnection,
    project_id: Uuid,
) -> Result<Option<project::Model>> {
    Project::find_by_id(project_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Retrieves all active projects, ordered by project number.
pub async fn get_active_projects(db: &DatabaseConnection) -> Result<Vec<project::Model>> {
    Project::find()
        .filter(project::Column::IsActive.eq(true))
        .order_by_asc(project::Column::ProjectNumber)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Per-project override updates; `None` fields are left untouched, and an
/// explicit `Some(None)` clears an override back to "inherit".
#[derive(Debug, Clone, Default)]
pub struct ProjectOverrides {
    pub material_ohp_percent: Option<Option<Decimal>>,
    pub labor_ohp_percent: Option<Option<Decimal>>,
    pub equipment_ohp_percent: Option<Option<Decimal>>,
    pub subcontractor_ohp_percent: Option<Option<Decimal>>,
    pub reminder_interval_days: Option<Option<i32>>,
    pub reminder_max_retries: Option<Option<i32>>,
    pub approval_token_expiration_hours: Option<Option<i32>>,
}

/// Applies override changes to a project.
pub async fn update_project_overrides(
    db: &DatabaseConnection,
    project_id: Uuid,
    overrides: ProjectOverrides,
) -> Result<project::Model> {
    let project = Project::find_by_id(project_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::ProjectNotFound {
            id: project_id.to_string(),
        })?;

    let mut active: project::ActiveModel = project.into();
    if let Some(v) = overrides.material_ohp_percent {
        active.material_ohp_percent = Set(v);
    }
    if let Some(v) = overrides.labor_ohp_percent {
        active.labor_ohp_percent = Set(v);
    }
    if let Some(v) = overrides.equipment_ohp_percent {
        active.equipment_ohp_percent = Set(v);
    }
    if let Some(v) = overrides.subcontractor_ohp_percent {
        active.subcontractor_ohp_percent = Set(v);
    }
    if let Some(v) = overrides.reminder_interval_days {
        active.reminder_interval_days = Set(v);
    }
    if let Some(v) = overrides.reminder_max_retries {
        active.reminder_max_retries = Set(v);
    }
    if let Some(v) = overrides.approval_token_expiration_hours {
        active.approval_token_expiration_hours = Set(v);
    }
    active.updated_at = Set(chrono::Utc::now());

    active.update(db).await.map_err(Into::into)
}
