//! Database connection and schema creation.
//!
//! Uses SeaORM's `Schema::create_table_from_entity` to derive the schema
//! straight from the entity definitions, so the database always matches the
//! Rust structs without hand-written SQL.

use crate::entities::{
    AppSetting, AuditLog, EmailLog, EquipmentItem, LaborItem, LineItemApproval, MaterialItem,
    Project, SubcontractorItem, TnmTicket,
};
use crate::errors::Result;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Schema};

/// Establishes a connection using the configured database URL.
pub async fn create_connection(database_url: &str) -> Result<DatabaseConnection> {
    Database::connect(database_url).await.map_err(Into::into)
}

/// Creates any missing tables from the entity definitions. Idempotent, so
/// it runs unconditionally at startup.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let mut statements = [
        schema.create_table_from_entity(Project),
        schema.create_table_from_entity(TnmTicket),
        schema.create_table_from_entity(LaborItem),
        schema.create_table_from_entity(MaterialItem),
        schema.create_table_from_entity(EquipmentItem),
        schema.create_table_from_entity(SubcontractorItem),
        schema.create_table_from_entity(LineItemApproval),
        schema.create_table_from_entity(AppSetting),
        schema.create_table_from_entity(EmailLog),
        schema.create_table_from_entity(AuditLog),
    ];

    for statement in &mut statements {
        db.execute(builder.build(statement.if_not_exists())).await?;
    }

    Ok(())
}
