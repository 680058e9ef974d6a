//! Line item business logic.
//!
//! Four item families (labor, material, equipment, subcontractor) hang off a
//! ticket. Every create/update/delete runs inside one transaction together
//! with a full totals recomputation, so ticket totals are never observably
//! stale. Labor items look their hourly rate up through the settings
//! hierarchy when the caller does not pin one explicitly.

use rust_decimal::Decimal;
use sea_orm::{Set, TransactionTrait, prelude::*};
use uuid::Uuid;

use crate::{
    core::{settings::SettingsResolver, totals},
    entities::{
        EquipmentItem, LaborItem, LaborType, MaterialItem, SubcontractorItem, TnmTicket,
        equipment_item, labor_item, material_item, subcontractor_item, tnm_ticket,
    },
    errors::{Error, Result},
};

fn require_non_negative(label: &str, amount: Decimal) -> Result<()> {
    if amount < Decimal::ZERO {
        return Err(Error::Validation {
            message: format!("{label} cannot be negative: {amount}"),
        });
    }
    Ok(())
}

async fn require_ticket<C>(db: &C, ticket_id: Uuid) -> Result<tnm_ticket::Model>
where
    C: ConnectionTrait,
{
    TnmTicket::find_by_id(ticket_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::TicketNotFound {
            id: ticket_id.to_string(),
        })
}

// ============ LABOR ITEMS ============

/// Input for creating a labor item. When `rate_per_hour` is absent the rate
/// is resolved from settings by labor type (ticket -> project -> global).
#[derive(Debug, Clone)]
pub struct NewLaborItem {
    pub tnm_ticket_id: Uuid,
    pub description: String,
    pub hours: Decimal,
    pub labor_type: LaborType,
    pub rate_per_hour: Option<Decimal>,
    pub line_order: i32,
}

/// Adds a labor item and recomputes ticket totals atomically.
/// Returns the item together with the freshly totaled ticket.
pub async fn create_labor_item(
    db: &DatabaseConnection,
    resolver: &SettingsResolver,
    input: NewLaborItem,
) -> Result<(labor_item::Model, tnm_ticket::Model)> {
    require_non_negative("hours", input.hours)?;

    let rate = match input.rate_per_hour {
        Some(rate) => {
            require_non_negative("rate_per_hour", rate)?;
            rate
        }
        None => resolver
            .resolve(
                db,
                input.labor_type.rate_key(),
                Some(input.tnm_ticket_id),
                None,
            )
            .await?
            .and_then(|value| value.as_decimal())
            .ok_or_else(|| Error::Validation {
                message: format!(
                    "no hourly rate configured for labor type '{}'",
                    input.labor_type.as_str()
                ),
            })?,
    };

    let txn = db.begin().await?;
    require_ticket(&txn, input.tnm_ticket_id).await?;

    let item = labor_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        tnm_ticket_id: Set(input.tnm_ticket_id),
        description: Set(input.description),
        hours: Set(input.hours),
        labor_type: Set(input.labor_type),
        rate_per_hour: Set(rate),
        line_order: Set(input.line_order),
        created_at: Set(chrono::Utc::now()),
    }
    .insert(&txn)
    .await?;

    let ticket = totals::recalculate_in_txn(&txn, input.tnm_ticket_id).await?;
    txn.commit().await?;
    Ok((item, ticket))
}

/// Partial update for a labor item; absent fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct LaborItemUpdate {
    pub description: Option<String>,
    pub hours: Option<Decimal>,
    pub labor_type: Option<LaborType>,
    pub rate_per_hour: Option<Decimal>,
    pub line_order: Option<i32>,
}

/// Updates a labor item and recomputes ticket totals atomically.
pub async fn update_labor_item(
    db: &DatabaseConnection,
    item_id: Uuid,
    update: LaborItemUpdate,
) -> Result<(labor_item::Model, tnm_ticket::Model)> {
    if let Some(hours) = update.hours {
        require_non_negative("hours", hours)?;
    }
    if let Some(rate) = update.rate_per_hour {
        require_non_negative("rate_per_hour", rate)?;
    }

    let txn = db.begin().await?;
    let item = LaborItem::find_by_id(item_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::LineItemNotFound {
            id: item_id.to_string(),
        })?;
    let ticket_id = item.tnm_ticket_id;

    let mut active: labor_item::ActiveModel = item.into();
    if let Some(description) = update.description {
        active.description = Set(description);
    }
    if let Some(hours) = update.hours {
        active.hours = Set(hours);
    }
    if let Some(labor_type) = update.labor_type {
        active.labor_type = Set(labor_type);
    }
    if let Some(rate) = update.rate_per_hour {
        active.rate_per_hour = Set(rate);
    }
    if let Some(line_order) = update.line_order {
        active.line_order = Set(line_order);
    }
    let item = active.update(&txn).await?;

    let ticket = totals::recalculate_in_txn(&txn, ticket_id).await?;
    txn.commit().await?;
    Ok((item, ticket))
}

/// Deletes a labor item and recomputes ticket totals atomically.
pub async fn delete_labor_item(
    db: &DatabaseConnection,
    item_id: Uuid,
) -> Result<tnm_ticket::Model> {
    let txn = db.begin().await?;
    let item = LaborItem::find_by_id(item_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::LineItemNotFound {
            id: item_id.to_string(),
        })?;
    let ticket_id = item.tnm_ticket_id;
    item.delete(&txn).await?;

    let ticket = totals::recalculate_in_txn(&txn, ticket_id).await?;
    txn.commit().await?;
    Ok(ticket)
}

// ============ MATERIAL ITEMS ============

#[derive(Debug, Clone)]
pub struct NewMaterialItem {
    pub tnm_ticket_id: Uuid,
    pub description: String,
    pub quantity: Decimal,
    pub unit: Option<String>,
    pub unit_price: Decimal,
    pub line_order: i32,
}

/// Adds a material item and recomputes ticket totals atomically.
pub async fn create_material_item(
    db: &DatabaseConnection,
    input: NewMaterialItem,
) -> Result<(material_item::Model, tnm_ticket::Model)> {
    require_non_negative("quantity", input.quantity)?;
    require_non_negative("unit_price", input.unit_price)?;

    let txn = db.begin().await?;
    require_ticket(&txn, input.tnm_ticket_id).await?;

    let item = material_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        tnm_ticket_id: Set(input.tnm_ticket_id),
        description: Set(input.description),
        quantity: Set(input.quantity),
        unit: Set(input.unit),
        unit_price: Set(input.unit_price),
        line_order: Set(input.line_order),
        created_at: Set(chrono::Utc::now()),
    }
    .insert(&txn)
    .await?;

    let ticket = totals::recalculate_in_txn(&txn, input.tnm_ticket_id).await?;
    txn.commit().await?;
    Ok((item, ticket))
}

#[derive(Debug, Clone, Default)]
pub struct MaterialItemUpdate {
    pub description: Option<String>,
    pub quantity: Option<Decimal>,
    pub unit: Option<Option<String>>,
    pub unit_price: Option<Decimal>,
    pub line_order: Option<i32>,
}

/// Updates a material item and recomputes ticket totals atomically.
pub async fn update_material_item(
    db: &DatabaseConnection,
    item_id: Uuid,
    update: MaterialItemUpdate,
) -> Result<(material_item::Model, tnm_ticket::Model)> {
    if let Some(quantity) = update.quantity {
        require_non_negative("quantity", quantity)?;
    }
    if let Some(unit_price) = update.unit_price {
        require_non_negative("unit_price", unit_price)?;
    }

    let txn = db.begin().await?;
    let item = MaterialItem::find_by_id(item_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::LineItemNotFound {
            id: item_id.to_string(),
        })?;
    let ticket_id = item.tnm_ticket_id;

    let mut active: material_item::ActiveModel = item.into();
    if let Some(description) = update.description {
        active.description = Set(description);
    }
    if let Some(quantity) = update.quantity {
        active.quantity = Set(quantity);
    }
    if let Some(unit) = update.unit {
        active.unit = Set(unit);
    }
    if let Some(unit_price) = update.unit_price {
        active.unit_price = Set(unit_price);
    }
    if let Some(line_order) = update.line_order {
        active.line_order = Set(line_order);
    }
    let item = active.update(&txn).await?;

    let ticket = totals::recalculate_in_txn(&txn, ticket_id).await?;
    txn.commit().await?;
    Ok((item, ticket))
}

/// Deletes a material item and recomputes ticket totals atomically.
pub async fn delete_material_item(
    db: &DatabaseConnection,
    item_id: Uuid,
) -> Result<tnm_ticket::Model> {
    let txn = db.begin().await?;
    let item = MaterialItem::find_by_id(item_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::LineItemNotFound {
            id: item_id.to_string(),
        })?;
    let ticket_id = item.tnm_ticket_id;
    item.delete(&txn).await?;

    let ticket = totals::recalculate_in_txn(&txn, ticket_id).await?;
    txn.commit().await?;
    Ok(ticket)
}

// ============ EQUIPMENT ITEMS ============

#[derive(Debug, Clone)]
pub struct NewEquipmentItem {
    pub tnm_ticket_id: Uuid,
    pub description: String,
    pub quantity: Decimal,
    pub unit: Option<String>,
    pub unit_price: Decimal,
    pub line_order: i32,
}

/// Adds an equipment item and recomputes ticket totals atomically.
pub async fn create_equipment_item(
    db: &DatabaseConnection,
    input: NewEquipmentItem,
) -> Result<(equipment_item::Model, tnm_ticket::Model)> {
    require_non_negative("quantity", input.quantity)?;
    require_non_negative("unit_price", input.unit_price)?;

    let txn = db.begin().await?;
    require_ticket(&txn, input.tnm_ticket_id).await?;

    let item = equipment_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        tnm_ticket_id: Set(input.tnm_ticket_id),
        description: Set(input.description),
        quantity: Set(input.quantity),
        unit: Set(input.unit),
        unit_price: Set(input.unit_price),
        line_order: Set(input.line_order),
        created_at: Set(chrono::Utc::now()),
    }
    .insert(&txn)
    .await?;

    let ticket = totals::recalculate_in_txn(&txn, input.tnm_ticket_id).await?;
    txn.commit().await?;
    Ok((item, ticket))
}

/// Deletes an equipment item and recomputes ticket totals atomically.
pub async fn delete_equipment_item(
    db: &DatabaseConnection,
    item_id: Uuid,
) -> Result<tnm_ticket::Model> {
    let txn = db.begin().await?;
    let item = EquipmentItem::find_by_id(item_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::LineItemNotFound {
            id: item_id.to_string(),
        })?;
    let ticket_id = item.tnm_ticket_id;
    item.delete(&txn).await?;

    let ticket = totals::recalculate_in_txn(&txn, ticket_id).await?;
    txn.commit().await?;
    Ok(ticket)
}

// ============ SUBCONTRACTOR ITEMS ============

#[derive(Debug, Clone)]
pub struct NewSubcontractorItem {
    pub tnm_ticket_id: Uuid,
    pub description: String,
    pub subcontractor_name: Option<String>,
    pub amount: Decimal,
    pub line_order: i32,
}

/// Adds a subcontractor item and recomputes ticket totals atomically.
pub async fn create_subcontractor_item(
    db: &DatabaseConnection,
    input: NewSubcontractorItem,
) -> Result<(subcontractor_item::Model, tnm_ticket::Model)> {
    require_non_negative("amount", input.amount)?;

    let txn = db.begin().await?;
    require_ticket(&txn, input.tnm_ticket_id).await?;

    let item = subcontractor_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        tnm_ticket_id: Set(input.tnm_ticket_id),
        description: Set(input.description),
        subcontractor_name: Set(input.subcontractor_name),
        amount: Set(input.amount),
        line_order: Set(input.line_order),
        created_at: Set(chrono::Utc::now()),
    }
    .insert(&txn)
    .await?;

    let ticket = totals::recalculate_in_txn(&txn, input.tnm_ticket_id).await?;
    txn.commit().await?;
    Ok((item, ticket))
}

/// Deletes a subcontractor item and recomputes ticket totals atomically.
pub async fn delete_subcontractor_item(
    db: &DatabaseConnection,
    item_id: Uuid,
) -> Result<tnm_ticket::Model> {
    let txn = db.begin().await?;
    let item = SubcontractorItem::find_by_id(item_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::LineItemNotFound {
            id: item_id.to_string(),
        })?;
    let ticket_id = item.tnm_ticket_id;
    item.delete(&txn).await?;

    let ticket = totals::recalculate_in_txn(&txn, ticket_id).await?;
    txn.commit().await?;
    Ok(ticket)
}
