//! Ticket totals recomputation.
//!
//! Ticket totals are always a pure function of the current line-item set and
//! the OH&P percentages snapshotted on the ticket - they are never edited
//! directly. Every line-item mutation re-runs [`recalculate_ticket_totals`]
//! inside the same database transaction so a concurrent reader can never
//! observe stale totals once the mutation is visible.
//!
//! All arithmetic is exact `Decimal` math rounded to cents; floats never
//! touch a monetary value.

use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{ActiveValue::Set, ConnectionTrait, TransactionTrait, prelude::*};
use uuid::Uuid;

use crate::{
    entities::{
        EquipmentItem, LaborItem, MaterialItem, SubcontractorItem, TnmTicket, equipment_item,
        labor_item, material_item, subcontractor_item, tnm_ticket,
    },
    errors::{Error, Result},
};

/// Currency rounding: two decimal places, midpoint away from zero.
fn to_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Applies an OH&P percentage markup to a subtotal.
/// A missing snapshot means no markup (0%).
fn with_markup(subtotal: Decimal, ohp_percent: Option<Decimal>) -> Decimal {
    let percent = ohp_percent.unwrap_or(Decimal::ZERO);
    to_cents(subtotal * (Decimal::ONE + percent / Decimal::ONE_HUNDRED))
}

/// The full line-item set of one ticket, loaded together for recomputation.
#[derive(Debug, Default, Clone)]
pub struct LineItemSet {
    pub labor: Vec<labor_item::Model>,
    pub material: Vec<material_item::Model>,
    pub equipment: Vec<equipment_item::Model>,
    pub subcontractor: Vec<subcontractor_item::Model>,
}

impl LineItemSet {
    /// Loads all four item categories for a ticket.
    pub async fn load<C>(db: &C, ticket_id: Uuid) -> Result<Self>
    where
        C: ConnectionTrait,
    {
        Ok(Self {
            labor: LaborItem::find()
                .filter(labor_item::Column::TnmTicketId.eq(ticket_id))
                .all(db)
                .await?,
            material: MaterialItem::find()
                .filter(material_item::Column::TnmTicketId.eq(ticket_id))
                .all(db)
                .await?,
            equipment: EquipmentItem::find()
                .filter(equipment_item::Column::TnmTicketId.eq(ticket_id))
                .all(db)
                .await?,
            subcontractor: SubcontractorItem::find()
                .filter(subcontractor_item::Column::TnmTicketId.eq(ticket_id))
                .all(db)
                .await?,
        })
    }
}

/// Recomputes every derived monetary field on the ticket model from the
/// given line items. Pure - touches only the computed fields, reads only the
/// snapshotted OH&P percentages.
pub fn recompute(ticket: &mut tnm_ticket::Model, items: &LineItemSet) {
    ticket.labor_subtotal = to_cents(items.labor.iter().map(labor_item::Model::subtotal).sum());
    ticket.total_labor_hours = items.labor.iter().map(|item| item.hours).sum();

    ticket.material_subtotal = to_cents(
        items
            .material
            .iter()
            .map(material_item::Model::subtotal)
            .sum(),
    );
    ticket.equipment_subtotal = to_cents(
        items
            .equipment
            .iter()
            .map(equipment_item::Model::subtotal)
            .sum(),
    );
    ticket.subcontractor_subtotal =
        to_cents(items.subcontractor.iter().map(|item| item.amount).sum());

    ticket.labor_total = with_markup(ticket.labor_subtotal, ticket.labor_ohp_percent);
    ticket.material_total = with_markup(ticket.material_subtotal, ticket.material_ohp_percent);
    ticket.equipment_total = with_markup(ticket.equipment_subtotal, ticket.equipment_ohp_percent);
    ticket.subcontractor_total = with_markup(
        ticket.subcontractor_subtotal,
        ticket.subcontractor_ohp_percent,
    );

    ticket.proposal_amount = ticket.labor_total
        + ticket.material_total
        + ticket.equipment_total
        + ticket.subcontractor_total;
}

/// Reloads the full current item set and saves freshly computed totals,
/// all inside one transaction. This is the only path that writes the
/// computed columns.
pub async fn recalculate_ticket_totals(
    db: &DatabaseConnection,
    ticket_id: Uuid,
) -> Result<tnm_ticket::Model> {
    let txn = db.begin().await?;
    let saved = recalculate_in_txn(&txn, ticket_id).await?;
    txn.commit().await?;
    Ok(saved)
}

/// Transaction-scoped variant, for callers that mutate line items and
/// recompute within one atomic unit.
pub async fn recalculate_in_txn<C>(db: &C, ticket_id: Uuid) -> Result<tnm_ticket::Model>
where
    C: ConnectionTrait,
{
    let mut ticket = TnmTicket::find_by_id(ticket_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::TicketNotFound {
            id: ticket_id.to_string(),
        })?;

    // Read the full current item set, not a cached snapshot, so concurrent
    // edits to the same ticket cannot produce lost updates.
    let items = LineItemSet::load(db, ticket_id).await?;
    recompute(&mut ticket, &items);

    let mut active: tnm_ticket::ActiveModel = ticket.clone().into();
    active.labor_subtotal = Set(ticket.labor_subtotal);
    active.labor_total = Set(ticket.labor_total);
    active.total_labor_hours = Set(ticket.total_labor_hours);
    active.material_subtotal = Set(ticket.material_subtotal);
    active.material_total = Set(ticket.material_total);
    active.equipment_subtotal = Set(ticket.equipment_subtotal);
    active.equipment_total = Set(ticket.equipment_total);
    active.subcontractor_subtotal = Set(ticket.subcontractor_subtotal);
    active.subcontractor_total = Set(ticket.subcontractor_total);
    active.proposal_amount = Set(ticket.proposal_amount);
    active.updated_at = Set(chrono::Utc::now());

    active.update(db).await.map_err(Into::into)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;
    use rust_decimal_macros::dec;

    fn labor(hours: Decimal, rate: Decimal) -> labor_item::Model {
        let mut item = test_labor_item(Uuid::new_v4());
        item.hours = hours;
        item.rate_per_hour = rate;
        item
    }

    #[test]
    fn test_recompute_single_labor_item_with_markup() {
        let project = test_project();
        let mut ticket = test_ticket(&project);
        ticket.labor_ohp_percent = Some(dec!(20.00));

        let items = LineItemSet {
            labor: vec![labor(dec!(10), dec!(57.00))],
            ..Default::default()
        };
        recompute(&mut ticket, &items);

        assert_eq!(ticket.labor_subtotal, dec!(570.00));
        assert_eq!(ticket.labor_total, dec!(684.00));
        assert_eq!(ticket.total_labor_hours, dec!(10));
        assert_eq!(ticket.proposal_amount, dec!(684.00));
    }

    #[test]
    fn test_recompute_empty_categories_contribute_zero() {
        let project = test_project();
        let mut ticket = test_ticket(&project);
        ticket.material_ohp_percent = Some(dec!(15.00));

        recompute(&mut ticket, &LineItemSet::default());

        assert_eq!(ticket.material_subtotal, Decimal::ZERO);
        assert_eq!(ticket.material_total, Decimal::ZERO);
        assert_eq!(ticket.proposal_amount, Decimal::ZERO);
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let project = test_project();
        let mut ticket = test_ticket(&project);
        ticket.labor_ohp_percent = Some(dec!(20.00));
        ticket.material_ohp_percent = Some(dec!(15.00));

        let mut material = test_material_item(ticket.id);
        material.quantity = dec!(3);
        material.unit_price = dec!(19.99);
        let items = LineItemSet {
            labor: vec![labor(dec!(7.5), dec!(45.00))],
            material: vec![material],
            ..Default::default()
        };

        recompute(&mut ticket, &items);
        let first = ticket.clone();
        recompute(&mut ticket, &items);

        assert_eq!(ticket.labor_subtotal, first.labor_subtotal);
        assert_eq!(ticket.material_total, first.material_total);
        assert_eq!(ticket.proposal_amount, first.proposal_amount);
    }

    #[test]
    fn test_markup_invariant_holds_per_category() {
        let project = test_project();
        let mut ticket = test_ticket(&project);
        ticket.equipment_ohp_percent = Some(dec!(10.00));

        let mut equipment = test_equipment_item(ticket.id);
        equipment.quantity = dec!(2);
        equipment.unit_price = dec!(125.55);
        let items = LineItemSet {
            equipment: vec![equipment],
            ..Default::default()
        };
        recompute(&mut ticket, &items);

        assert_eq!(ticket.equipment_subtotal, dec!(251.10));
        // total == subtotal * (1 + ohp/100), rounded to cents
        assert_eq!(ticket.equipment_total, dec!(276.21));
    }

    #[test]
    fn test_missing_ohp_snapshot_means_no_markup() {
        let project = test_project();
        let mut ticket = test_ticket(&project);
        ticket.subcontractor_ohp_percent = None;

        let mut sub = test_subcontractor_item(ticket.id);
        sub.amount = dec!(1000.00);
        let items = LineItemSet {
            subcontractor: vec![sub],
            ..Default::default()
        };
        recompute(&mut ticket, &items);

        assert_eq!(ticket.subcontractor_total, dec!(1000.00));
    }

    #[tokio::test]
    async fn test_recalculate_persists_totals() -> Result<()> {
        let db = setup_test_db().await?;
        let project = insert_project(&db, test_project()).await?;
        let mut ticket = test_ticket(&project);
        ticket.labor_ohp_percent = Some(dec!(20.00));
        let ticket = insert_ticket(&db, ticket).await?;

        let mut item = test_labor_item(ticket.id);
        item.hours = dec!(10);
        item.rate_per_hour = dec!(57.00);
        insert_labor_item(&db, item).await?;

        let updated = recalculate_ticket_totals(&db, ticket.id).await?;
        assert_eq!(updated.labor_subtotal, dec!(570.00));
        assert_eq!(updated.proposal_amount, dec!(684.00));

        // Verify persistence
        let reloaded = TnmTicket::find_by_id(ticket.id).one(&db).await?.unwrap();
        assert_eq!(reloaded.proposal_amount, dec!(684.00));
        Ok(())
    }

    #[tokio::test]
    async fn test_recalculate_unknown_ticket() -> Result<()> {
        let db = setup_test_db().await?;
        let result = recalculate_ticket_totals(&db, Uuid::new_v4()).await;
        assert!(matches!(
            result.unwrap_err(),
            Error::TicketNotFound { id: _ }
        ));
        Ok(())
    }
}
