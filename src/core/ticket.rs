//! TNM ticket lifecycle.
//!
//! Creation snapshots the effective OH&P percentages onto the ticket, the
//! send path mints the approval token and queues the initial email, and the
//! manual paths (status moves, approval override, payment marking) enforce
//! the legal transition set. Every mutation re-reads the ticket inside its
//! transaction and re-checks status before writing, then records an audit
//! entry in the same transaction.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    core::{
        audit::{Actor, ChangeSet},
        settings::SettingsResolver,
        token::ApprovalTokens,
    },
    entities::{
        Project, TicketStatus, TnmTicket, email_log, project, tnm_ticket,
    },
    errors::{Error, Result},
    queue::{EmailJob, JobQueue},
};

/// Input for creating a ticket. Line items are added separately through
/// `core::line_items`, each addition recomputing totals.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub project_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub submitter_name: String,
    pub submitter_email: String,
    pub proposal_date: chrono::NaiveDate,
    pub due_date: Option<chrono::NaiveDate>,
}

/// Generates the next sequential ticket number for a project,
/// e.g. "TNM-1042-003".
async fn generate_tnm_number<C>(db: &C, proj: &project::Model) -> Result<String>
where
    C: ConnectionTrait,
{
    let existing = TnmTicket::find()
        .filter(tnm_ticket::Column::ProjectId.eq(proj.id))
        .count(db)
        .await?;
    Ok(format!("TNM-{}-{:03}", proj.project_number, existing + 1))
}

/// Creates a draft ticket, snapshotting the effective OH&P percentage for
/// each category (project override, else global default) so later default
/// changes never reprice this ticket.
pub async fn create_ticket(
    db: &DatabaseConnection,
    resolver: &SettingsResolver,
    input: NewTicket,
    actor: &Actor,
) -> Result<tnm_ticket::Model> {
    if input.title.trim().is_empty() {
        return Err(Error::Validation {
            message: "Ticket title cannot be empty".to_string(),
        });
    }

    let proj = Project::find_by_id(input.project_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::ProjectNotFound {
            id: input.project_id.to_string(),
        })?;

    // Snapshot the effective OH&P for each category at creation time
    let mut snapshots = [None; 4];
    for (slot, key) in snapshots.iter_mut().zip([
        "DEFAULT_LABOR_OHP",
        "DEFAULT_MATERIAL_OHP",
        "DEFAULT_EQUIPMENT_OHP",
        "DEFAULT_SUBCONTRACTOR_OHP",
    ]) {
        *slot = resolver
            .resolve(db, key, None, Some(proj.id))
            .await?
            .and_then(|value| value.as_decimal());
    }
    let [labor_ohp, material_ohp, equipment_ohp, subcontractor_ohp] = snapshots;

    let txn = db.begin().await?;
    let tnm_number = generate_tnm_number(&txn, &proj).await?;
    let now = Utc::now();

    let ticket = tnm_ticket::ActiveModel {
        id: Set(Uuid::new_v4()),
        tnm_number: Set(tnm_number.clone()),
        rfco_number: Set(None),
        project_id: Set(proj.id),
        project_number: Set(proj.project_number.clone()),
        title: Set(input.title.trim().to_string()),
        description: Set(input.description),
        submitter_name: Set(input.submitter_name),
        submitter_email: Set(input.submitter_email),
        proposal_date: Set(input.proposal_date),
        response_date: Set(None),
        due_date: Set(input.due_date),
        status: Set(TicketStatus::Draft),
        labor_ohp_percent: Set(labor_ohp),
        material_ohp_percent: Set(material_ohp),
        equipment_ohp_percent: Set(equipment_ohp),
        subcontractor_ohp_percent: Set(subcontractor_ohp),
        rate_project_manager: Set(None),
        rate_superintendent: Set(None),
        rate_carpenter: Set(None),
        rate_laborer: Set(None),
        labor_subtotal: Set(Decimal::ZERO),
        labor_total: Set(Decimal::ZERO),
        total_labor_hours: Set(Decimal::ZERO),
        material_subtotal: Set(Decimal::ZERO),
        material_total: Set(Decimal::ZERO),
        equipment_subtotal: Set(Decimal::ZERO),
        equipment_total: Set(Decimal::ZERO),
        subcontractor_subtotal: Set(Decimal::ZERO),
        subcontractor_total: Set(Decimal::ZERO),
        proposal_amount: Set(Decimal::ZERO),
        approved_amount: Set(Decimal::ZERO),
        email_sent_count: Set(0),
        last_email_sent_at: Set(None),
        reminder_count: Set(0),
        last_reminder_sent_at: Set(None),
        send_reminders_until_accepted: Set(false),
        send_reminders_until_paid: Set(false),
        approval_token: Set(None),
        approval_token_expires_at: Set(None),
        viewed_at: Set(None),
        is_paid: Set(0),
        paid_date: Set(None),
        paid_by: Set(None),
        notes: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&txn)
    .await?;

    crate::core::audit::log(
        &txn,
        "tnm_ticket",
        ticket.id,
        "create",
        actor,
        ChangeSet::new()
            .with("tnm_number", None::<String>, Some(tnm_number))
            .with("title", None::<String>, Some(ticket.title.clone())),
    )
    .await?;

    txn.commit().await?;
    info!("Created ticket {} for project {}", ticket.tnm_number, proj.project_number);
    Ok(ticket)
}

/// Finds a ticket by its unique ID.
pub async fn get_ticket_by_id(
    db: &DatabaseConnection,
    ticket_id: Uuid,
) -> Result<Option<tnm_ticket::Model>> {
    TnmTicket::find_by_id(ticket_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Finds a ticket by its TNM number.
pub async fn get_ticket_by_number(
    db: &DatabaseConnection,
    tnm_number: &str,
) -> Result<Option<tnm_ticket::Model>> {
    TnmTicket::find()
        .filter(tnm_ticket::Column::TnmNumber.eq(tnm_number))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Lists a project's tickets, newest first.
pub async fn get_tickets_for_project(
    db: &DatabaseConnection,
    project_id: Uuid,
) -> Result<Vec<tnm_ticket::Model>> {
    TnmTicket::find()
        .filter(tnm_ticket::Column::ProjectId.eq(project_id))
        .order_by_desc(tnm_ticket::Column::CreatedAt)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Pre-send workflow moves: draft / pending_review / ready_to_send /
/// cancelled. Anything already sent must go through the approval or manual
/// override paths instead.
pub async fn update_status(
    db: &DatabaseConnection,
    ticket_id: Uuid,
    new_status: TicketStatus,
    actor: &Actor,
) -> Result<tnm_ticket::Model> {
    let allowed = matches!(
        new_status,
        TicketStatus::Draft
            | TicketStatus::PendingReview
            | TicketStatus::ReadyToSend
            | TicketStatus::Cancelled
    );
    if !allowed {
        return Err(Error::StateConflict {
            message: format!("status '{new_status}' is not reachable via the workflow move"),
        });
    }

    let txn = db.begin().await?;
    let ticket = TnmTicket::find_by_id(ticket_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::TicketNotFound {
            id: ticket_id.to_string(),
        })?;

    if ticket.status.is_resolved() || ticket.status.is_awaiting_response() {
        return Err(Error::StateConflict {
            message: format!(
                "cannot move ticket from '{}' via the workflow move",
                ticket.status
            ),
        });
    }

    let old_status = ticket.status;
    let mut active: tnm_ticket::ActiveModel = ticket.into();
    active.status = Set(new_status);
    active.updated_at = Set(Utc::now());
    let ticket = active.update(&txn).await?;

    crate::core::audit::log(
        &txn,
        "tnm_ticket",
        ticket_id,
        "status_change",
        actor,
        ChangeSet::new().with(
            "status",
            Some(old_status.as_str()),
            Some(new_status.as_str()),
        ),
    )
    .await?;

    txn.commit().await?;
    info!(
        "Status updated for ticket {}: {} -> {}",
        ticket.tnm_number, old_status, new_status
    );
    Ok(ticket)
}

/// Result of a successful send: the updated ticket plus the minted token.
#[derive(Debug)]
pub struct SendOutcome {
    pub ticket: tnm_ticket::Model,
    pub approval_token: String,
    pub to_email: String,
}

/// Sends the RFCO to the General Contractor.
///
/// Mints a fresh approval token, transitions the ticket to `sent`, records
/// the queued email, and enqueues the initial-send job. A queue failure after
/// commit is logged but does not fail the send - the ticket state already
/// reflects the intent to send and delivery is best-effort from here.
pub async fn send_rfco(
    db: &DatabaseConnection,
    resolver: &SettingsResolver,
    tokens: &ApprovalTokens,
    queue: &Arc<dyn JobQueue>,
    ticket_id: Uuid,
    gc_email: Option<String>,
    actor: &Actor,
) -> Result<SendOutcome> {
    let ticket = TnmTicket::find_by_id(ticket_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::TicketNotFound {
            id: ticket_id.to_string(),
        })?;

    if !ticket.status.can_send() {
        return Err(Error::StateConflict {
            message: format!(
                "cannot send ticket with status '{}'; must be 'ready_to_send' or 'pending_review'",
                ticket.status
            ),
        });
    }

    let proj = Project::find_by_id(ticket.project_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::ProjectNotFound {
            id: ticket.project_id.to_string(),
        })?;

    let to_email = gc_email
        .clone()
        .or_else(|| proj.gc_email.clone())
        .ok_or_else(|| Error::Validation {
            message: "no GC email on file; update the project or pass one explicitly".to_string(),
        })?;

    let (token, expires_at) = tokens.issue(db, resolver, &ticket).await?;
    let from_email = resolver
        .resolve(db, "SMTP_FROM_EMAIL", None, None)
        .await?
        .map(|value| value.to_string())
        .unwrap_or_default();

    let txn = db.begin().await?;

    // Re-read and re-check inside the transaction; a concurrent submit or
    // override loses to whichever commit lands first.
    let ticket = TnmTicket::find_by_id(ticket_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::TicketNotFound {
            id: ticket_id.to_string(),
        })?;
    if !ticket.status.can_send() {
        return Err(Error::StateConflict {
            message: format!("ticket status changed to '{}' mid-send", ticket.status),
        });
    }

    let old_status = ticket.status;
    let sent_count = ticket.email_sent_count + 1;
    let now = Utc::now();
    let tnm_number = ticket.tnm_number.clone();

    let mut active: tnm_ticket::ActiveModel = ticket.into();
    active.status = Set(TicketStatus::Sent);
    active.approval_token = Set(Some(token.clone()));
    active.approval_token_expires_at = Set(Some(expires_at));
    active.email_sent_count = Set(sent_count);
    active.last_email_sent_at = Set(Some(now));
    active.updated_at = Set(now);
    let ticket = active.update(&txn).await?;

    // Keep the project's GC contact current when the caller supplies one
    if let Some(new_gc_email) = gc_email {
        let mut proj_active: project::ActiveModel = proj.clone().into();
        proj_active.gc_email = Set(Some(new_gc_email));
        proj_active.updated_at = Set(now);
        proj_active.update(&txn).await?;
    }

    email_log::ActiveModel {
        id: Set(Uuid::new_v4()),
        tnm_ticket_id: Set(Some(ticket_id)),
        to_email: Set(to_email.clone()),
        from_email: Set(from_email),
        subject: Set(format!("RFCO {} - {}", tnm_number, proj.name)),
        body_text: Set(Some(format!("Request for Change Order: {}", ticket.title))),
        body_html: Set(None),
        email_type: Set("initial_send".to_string()),
        status: Set("queued".to_string()),
        error_message: Set(None),
        sent_at: Set(None),
        created_at: Set(now),
    }
    .insert(&txn)
    .await?;

    crate::core::audit::log(
        &txn,
        "tnm_ticket",
        ticket_id,
        "send",
        actor,
        ChangeSet::new()
            .with("status", Some(old_status.as_str()), Some("sent"))
            .with("sent_to", None::<String>, Some(to_email.clone()))
            .with(
                "email_sent_count",
                Some((sent_count - 1).to_string()),
                Some(sent_count.to_string()),
            ),
    )
    .await?;

    txn.commit().await?;

    // Best-effort from here on: the status change is durable regardless
    let job = EmailJob::InitialSend {
        ticket_id,
        to_email: to_email.clone(),
        approval_token: token.clone(),
        retry_count: 0,
    };
    match queue.enqueue(job).await {
        Ok(job_id) => info!("Enqueued RFCO email job {job_id} for ticket {tnm_number}"),
        Err(e) => error!("Failed to enqueue RFCO email for ticket {tnm_number}: {e}"),
    }

    Ok(SendOutcome {
        ticket,
        approval_token: token,
        to_email,
    })
}

/// Manually queues another reminder to the GC. Requires the ticket to have
/// been sent and still hold a live approval token; the worker updates the
/// reminder counters when the send actually succeeds.
pub async fn send_manual_reminder(
    db: &DatabaseConnection,
    queue: &Arc<dyn JobQueue>,
    ticket_id: Uuid,
    actor: &Actor,
) -> Result<tnm_ticket::Model> {
    let ticket = TnmTicket::find_by_id(ticket_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::TicketNotFound {
            id: ticket_id.to_string(),
        })?;

    if !matches!(
        ticket.status,
        TicketStatus::Sent | TicketStatus::Viewed | TicketStatus::PartiallyApproved
    ) {
        return Err(Error::StateConflict {
            message: format!(
                "cannot send reminder for ticket with status '{}'; must be sent first",
                ticket.status
            ),
        });
    }

    let token = ticket
        .approval_token
        .clone()
        .ok_or_else(|| Error::StateConflict {
            message: "no approval token on ticket; send the RFCO first".to_string(),
        })?;

    let proj = Project::find_by_id(ticket.project_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::ProjectNotFound {
            id: ticket.project_id.to_string(),
        })?;
    let to_email = proj.gc_email.clone().ok_or_else(|| Error::Validation {
        message: "no GC email on file; update the project settings".to_string(),
    })?;

    crate::core::audit::log(
        db,
        "tnm_ticket",
        ticket_id,
        "send_reminder",
        actor,
        ChangeSet::new().with("sent_to", None::<String>, Some(to_email.clone())),
    )
    .await?;

    let job = EmailJob::Reminder {
        ticket_id,
        to_email,
        approval_token: token,
        reminder_number: u32::try_from(ticket.reminder_count).unwrap_or(0) + 1,
    };
    match queue.enqueue(job).await {
        Ok(job_id) => info!(
            "Enqueued manual reminder job {job_id} for ticket {}",
            ticket.tnm_number
        ),
        Err(e) => error!(
            "Failed to enqueue reminder for ticket {}: {e}",
            ticket.tnm_number
        ),
    }

    Ok(ticket)
}

/// Records the GC's first visit to the approval link. Idempotent: only the
/// first view stamps `viewed_at` and moves `sent` to `viewed`.
pub async fn record_view(
    db: &DatabaseConnection,
    ticket_id: Uuid,
    actor: &Actor,
) -> Result<tnm_ticket::Model> {
    let txn = db.begin().await?;
    let ticket = TnmTicket::find_by_id(ticket_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::TicketNotFound {
            id: ticket_id.to_string(),
        })?;

    if ticket.viewed_at.is_some() {
        txn.commit().await?;
        return Ok(ticket);
    }

    let old_status = ticket.status;
    let now = Utc::now();
    let mut active: tnm_ticket::ActiveModel = ticket.into();
    active.viewed_at = Set(Some(now));
    if old_status == TicketStatus::Sent {
        active.status = Set(TicketStatus::Viewed);
    }
    active.updated_at = Set(now);
    let ticket = active.update(&txn).await?;

    crate::core::audit::log(
        &txn,
        "tnm_ticket",
        ticket_id,
        "view",
        actor,
        ChangeSet::new()
            .with("status", Some(old_status.as_str()), Some(ticket.status.as_str()))
            .with("viewed_at", None::<String>, Some(now.to_rfc3339())),
    )
    .await?;

    txn.commit().await?;
    Ok(ticket)
}

/// Target of a manual approval override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideDecision {
    Approved,
    Denied,
    PartiallyApproved,
    /// Undo a resolution back to `sent`, clearing response and paid state.
    UndoToSent,
}

/// Admin override of the approval outcome, bypassing the GC link entirely.
/// Supports the explicit undo back to `sent`, which also clears paid state.
pub async fn manual_approval_override(
    db: &DatabaseConnection,
    ticket_id: Uuid,
    decision: OverrideDecision,
    approved_amount: Option<Decimal>,
    notes: Option<String>,
    actor: &Actor,
) -> Result<tnm_ticket::Model> {
    let txn = db.begin().await?;
    let ticket = TnmTicket::find_by_id(ticket_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::TicketNotFound {
            id: ticket_id.to_string(),
        })?;

    let old_status = ticket.status;
    let old_amount = ticket.approved_amount;
    let was_paid = ticket.is_paid != 0;
    let had_response = ticket.response_date.is_some();
    let proposal_amount = ticket.proposal_amount;
    let existing_notes = ticket.notes.clone();
    let tnm_number = ticket.tnm_number.clone();

    let mut active: tnm_ticket::ActiveModel = ticket.into();
    let now = Utc::now();

    let new_status = match decision {
        OverrideDecision::Approved => {
            active.approved_amount = Set(approved_amount.unwrap_or(proposal_amount));
            TicketStatus::Approved
        }
        OverrideDecision::Denied => {
            active.approved_amount = Set(Decimal::ZERO);
            TicketStatus::Denied
        }
        OverrideDecision::PartiallyApproved => {
            let amount = approved_amount.ok_or_else(|| Error::Validation {
                message: "approved_amount is required for partial approval".to_string(),
            })?;
            active.approved_amount = Set(amount);
            TicketStatus::PartiallyApproved
        }
        OverrideDecision::UndoToSent => {
            active.approved_amount = Set(Decimal::ZERO);
            active.response_date = Set(None);
            if was_paid {
                active.is_paid = Set(0);
                active.paid_date = Set(None);
                active.paid_by = Set(None);
            }
            TicketStatus::Sent
        }
    };
    active.status = Set(new_status);

    if decision != OverrideDecision::UndoToSent && !had_response {
        active.response_date = Set(Some(now.date_naive()));
    }

    if let Some(note) = notes {
        let tagged = match &actor.user_id {
            Some(user) => format!("[Manual Override by {user}]: {note}"),
            None => format!("[Manual Override]: {note}"),
        };
        let combined = match existing_notes {
            Some(existing) => format!("{existing}\n\n{tagged}"),
            None => tagged,
        };
        active.notes = Set(Some(combined));
    }
    active.updated_at = Set(now);

    let ticket = active.update(&txn).await?;

    crate::core::audit::log(
        &txn,
        "tnm_ticket",
        ticket_id,
        "manual_approval_override",
        actor,
        ChangeSet::new()
            .with("status", Some(old_status.as_str()), Some(new_status.as_str()))
            .with(
                "approved_amount",
                Some(old_amount.to_string()),
                Some(ticket.approved_amount.to_string()),
            ),
    )
    .await?;

    txn.commit().await?;
    info!(
        "Manual approval override for ticket {tnm_number}: {old_status} -> {new_status}"
    );
    Ok(ticket)
}

/// Marks a ticket paid or unpaid. Only approved and partially approved
/// tickets are payable; paid_date/paid_by are stamped on the first mark and
/// cleared entirely on unmark.
pub async fn mark_paid(
    db: &DatabaseConnection,
    ticket_id: Uuid,
    is_paid: bool,
    actor: &Actor,
) -> Result<tnm_ticket::Model> {
    let txn = db.begin().await?;
    let ticket = TnmTicket::find_by_id(ticket_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::TicketNotFound {
            id: ticket_id.to_string(),
        })?;

    if !ticket.status.is_resolved() || ticket.status == TicketStatus::Denied {
        return Err(Error::StateConflict {
            message: format!(
                "only approved or partially approved tickets can be marked paid; status is '{}'",
                ticket.status
            ),
        });
    }

    let was_paid = ticket.is_paid != 0;
    let already_stamped = ticket.paid_date.is_some();
    let tnm_number = ticket.tnm_number.clone();
    let mut active: tnm_ticket::ActiveModel = ticket.into();
    let now = Utc::now();

    if is_paid {
        active.is_paid = Set(1);
        if !already_stamped {
            active.paid_date = Set(Some(now));
            active.paid_by = Set(actor.user_id.clone());
        }
    } else {
        active.is_paid = Set(0);
        active.paid_date = Set(None);
        active.paid_by = Set(None);
    }
    active.updated_at = Set(now);
    let ticket = active.update(&txn).await?;

    crate::core::audit::log(
        &txn,
        "tnm_ticket",
        ticket_id,
        if is_paid { "mark_as_paid" } else { "mark_as_unpaid" },
        actor,
        ChangeSet::new().with(
            "is_paid",
            Some(was_paid.to_string()),
            Some(is_paid.to_string()),
        ),
    )
    .await?;

    txn.commit().await?;
    info!(
        "Payment status updated for ticket {tnm_number}: {} -> {}",
        was_paid, is_paid
    );
    Ok(ticket)
}

/// Outcome of a bulk operation: per-ticket success or failure, in input
/// order. One ticket failing never aborts the rest.
#[derive(Debug, Default)]
pub struct BulkOutcome {
    pub succeeded: Vec<Uuid>,
    pub failed: Vec<(Uuid, String)>,
}

/// Approves a batch of tickets via the manual override path.
pub async fn bulk_approve(
    db: &DatabaseConnection,
    ticket_ids: &[Uuid],
    actor: &Actor,
) -> Result<BulkOutcome> {
    let mut outcome = BulkOutcome::default();
    for &ticket_id in ticket_ids {
        match manual_approval_override(
            db,
            ticket_id,
            OverrideDecision::Approved,
            None,
            None,
            actor,
        )
        .await
        {
            Ok(_) => outcome.succeeded.push(ticket_id),
            Err(e) => {
                warn!("Bulk approve failed for ticket {ticket_id}: {e}");
                outcome.failed.push((ticket_id, e.to_string()));
            }
        }
    }
    Ok(outcome)
}

/// Marks a batch of tickets paid.
pub async fn bulk_mark_paid(
    db: &DatabaseConnection,
    ticket_ids: &[Uuid],
    actor: &Actor,
) -> Result<BulkOutcome> {
    let mut outcome = BulkOutcome::default();
    for &ticket_id in ticket_ids {
        match mark_paid(db, ticket_id, true, actor).await {
            Ok(_) => outcome.succeeded.push(ticket_id),
            Err(e) => {
                warn!("Bulk mark-paid failed for ticket {ticket_id}: {e}");
                outcome.failed.push((ticket_id, e.to_string()));
            }
        }
    }
    Ok(outcome)
}
