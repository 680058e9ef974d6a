//! Audit trail recording.
//!
//! Every workflow action writes one audit row. Changes are captured as a flat
//! `{field: {old, new}}` map with string-serialized scalar values so audit
//! consumers never need to interpret nested structures or non-string types.

use std::collections::BTreeMap;

use sea_orm::{ConnectionTrait, Set, prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{entities::audit_log, errors::Result};

/// Old/new pair for a single changed field, both string-serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old: Option<String>,
    pub new: Option<String>,
}

/// Flat, ordered map of field changes for one audit entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet(BTreeMap<String, FieldChange>);

impl ChangeSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a field transition. Values are stringified by the caller;
    /// `None` stands for a previously/now absent value.
    #[must_use]
    pub fn with(
        mut self,
        field: &str,
        old: Option<impl Into<String>>,
        new: Option<impl Into<String>>,
    ) -> Self {
        self.0.insert(
            field.to_string(),
            FieldChange {
                old: old.map(Into::into),
                new: new.map(Into::into),
            },
        );
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldChange> {
        self.0.get(field)
    }
}

/// Identity of the actor for audit attribution. GC actions carry no user id
/// (the GC is not a system user).
#[derive(Debug, Clone, Default)]
pub struct Actor {
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl Actor {
    /// An internal user identified by the auth collaborator.
    #[must_use]
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    /// The anonymous GC acting through an approval link.
    #[must_use]
    pub fn gc() -> Self {
        Self::default()
    }
}

/// Writes one audit row. Failures propagate; audit writes happen inside the
/// same transaction as the change they describe.
pub async fn log<C>(
    db: &C,
    entity_type: &str,
    entity_id: Uuid,
    action: &str,
    actor: &Actor,
    changes: ChangeSet,
) -> Result<audit_log::Model>
where
    C: ConnectionTrait,
{
    let serialized = if changes.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&changes).map_err(|e| crate::errors::Error::Validation {
            message: format!("unserializable audit changes: {e}"),
        })?)
    };

    let entry = audit_log::ActiveModel {
        id: Set(Uuid::new_v4()),
        entity_type: Set(entity_type.to_string()),
        entity_id: Set(entity_id),
        action: Set(action.to_string()),
        user_id: Set(actor.user_id.clone()),
        changes: Set(serialized),
        ip_address: Set(actor.ip_address.clone()),
        user_agent: Set(actor.user_agent.clone()),
        created_at: Set(chrono::Utc::now()),
    };

    entry.insert(db).await.map_err(Into::into)
}

/// Lists audit entries for one entity, newest first.
pub async fn entries_for_entity(
    db: &DatabaseConnection,
    entity_id: Uuid,
) -> Result<Vec<audit_log::Model>> {
    use sea_orm::QueryOrder;

    audit_log::Entity::find()
        .filter(audit_log::Column::EntityId.eq(entity_id))
        .order_by_desc(audit_log::Column::CreatedAt)
        .all(db)
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;

    #[test]
    fn test_change_set_builds_flat_map() {
        let changes = ChangeSet::new()
            .with("status", Some("sent"), Some("approved"))
            .with("approved_amount", None::<String>, Some("684.00"));

        assert!(!changes.is_empty());
        let status = changes.get("status").unwrap();
        assert_eq!(status.old.as_deref(), Some("sent"));
        assert_eq!(status.new.as_deref(), Some("approved"));
        assert_eq!(changes.get("approved_amount").unwrap().old, None);
    }

    #[test]
    fn test_change_set_serializes_as_field_map() {
        let changes = ChangeSet::new().with("status", Some("draft"), Some("sent"));
        let json = serde_json::to_string(&changes).unwrap();
        assert_eq!(json, r#"{"status":{"old":"draft","new":"sent"}}"#);
    }

    #[tokio::test]
    async fn test_log_persists_entry() -> Result<()> {
        let db = setup_test_db().await?;
        let entity_id = Uuid::new_v4();

        log(
            &db,
            "tnm_ticket",
            entity_id,
            "send",
            &Actor::user("admin-1"),
            ChangeSet::new().with("status", Some("ready_to_send"), Some("sent")),
        )
        .await?;

        let entries = entries_for_entity(&db, entity_id).await?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "send");
        assert_eq!(entries[0].user_id.as_deref(), Some("admin-1"));
        assert!(entries[0].changes.as_deref().unwrap().contains("ready_to_send"));
        Ok(())
    }

    #[tokio::test]
    async fn test_gc_actions_have_no_user() -> Result<()> {
        let db = setup_test_db().await?;
        let entity_id = Uuid::new_v4();

        log(&db, "tnm_ticket", entity_id, "view", &Actor::gc(), ChangeSet::new()).await?;

        let entries = entries_for_entity(&db, entity_id).await?;
        assert_eq!(entries[0].user_id, None);
        assert_eq!(entries[0].changes, None);
        Ok(())
    }
}
