//! GC approval link handling.
//!
//! The GC is not a system user - everything here is gated by the approval
//! token alone. Verification checks the signed token, then the ticket's
//! stored token and stored expiry independently of the embedded claims, so a
//! token that was invalidated by a previous submission is rejected even
//! though its signature still verifies. Successful submission clears the
//! stored token, cancels scheduled reminders and queues the internal
//! confirmation email.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{Set, TransactionTrait, prelude::*};
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    core::{
        audit::{Actor, ChangeSet},
        settings::SettingsResolver,
        ticket::record_view,
        token::ApprovalTokens,
        totals::LineItemSet,
    },
    entities::{
        ApprovalStatus, Project, TicketStatus, TnmTicket, line_item_approval, project, tnm_ticket,
    },
    errors::{Error, Result},
    queue::{EmailJob, JobQueue, ReminderScheduler},
};

/// Checks the presented token against the ticket's stored token and stored
/// expiry. The signed claims were already verified; this is the replay
/// defense after invalidation.
fn check_stored_token(ticket: &tnm_ticket::Model, presented: &str) -> Result<()> {
    match ticket.approval_token.as_deref() {
        Some(stored) if stored == presented => {}
        _ => {
            return Err(Error::TokenInvalid {
                reason: "token no longer matches this ticket".to_string(),
            });
        }
    }
    match ticket.approval_token_expires_at {
        Some(expires_at) if expires_at >= Utc::now() => Ok(()),
        _ => Err(Error::TokenExpired),
    }
}

/// Everything the approval page needs to render for the GC.
#[derive(Debug)]
pub struct ApprovalView {
    pub ticket: tnm_ticket::Model,
    pub project: project::Model,
    pub items: LineItemSet,
    pub already_responded: bool,
}

/// Verifies an approval link and returns the ticket for GC review,
/// recording the first view. Public entry point - no authentication beyond
/// the token itself.
pub async fn verify_approval_link(
    db: &DatabaseConnection,
    tokens: &ApprovalTokens,
    token: &str,
    actor: &Actor,
) -> Result<ApprovalView> {
    let ticket_id = tokens.verify(token)?;

    let ticket = TnmTicket::find_by_id(ticket_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::TicketNotFound {
            id: ticket_id.to_string(),
        })?;
    check_stored_token(&ticket, token)?;

    let proj = Project::find_by_id(ticket.project_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::ProjectNotFound {
            id: ticket.project_id.to_string(),
        })?;

    let already_responded = ticket.status.is_resolved();
    let ticket = record_view(db, ticket_id, actor).await?;
    let items = LineItemSet::load(db, ticket_id).await?;

    Ok(ApprovalView {
        ticket,
        project: proj,
        items,
        already_responded,
    })
}

/// GC decision on one line item.
#[derive(Debug, Clone)]
pub struct LineItemDecision {
    /// labor, material, equipment or subcontractor
    pub line_item_type: String,
    pub line_item_id: Uuid,
    pub approved: bool,
    pub approved_amount: Option<Decimal>,
    pub comment: Option<String>,
}

/// Overall decision accompanying the per-item list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    ApproveAll,
    DenyAll,
    Partial,
}

/// The GC's submitted response.
#[derive(Debug, Clone)]
pub struct ApprovalSubmission {
    pub decision: Decision,
    pub line_item_approvals: Vec<LineItemDecision>,
    pub gc_name: Option<String>,
    pub gc_comment: Option<String>,
}

/// Result of a submission.
#[derive(Debug)]
pub struct ApprovalOutcome {
    pub ticket: tnm_ticket::Model,
    pub approved_count: usize,
    pub denied_count: usize,
    pub approved_amount: Decimal,
}

/// Submits the GC's approval/denial for a ticket.
///
/// Aggregates the per-item decisions into the final status (all approved =>
/// approved, all denied => denied, mixed => partially approved), stamps the
/// response, clears the stored token so the credential cannot be replayed,
/// cancels scheduled reminders and queues the internal confirmation email.
#[allow(clippy::too_many_lines)]
pub async fn submit_approval(
    db: &DatabaseConnection,
    resolver: &SettingsResolver,
    tokens: &ApprovalTokens,
    queue: &Arc<dyn JobQueue>,
    scheduler: &ReminderScheduler,
    token: &str,
    submission: ApprovalSubmission,
    actor: &Actor,
) -> Result<ApprovalOutcome> {
    let ticket_id = tokens.verify(token)?;

    let ticket = TnmTicket::find_by_id(ticket_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::TicketNotFound {
            id: ticket_id.to_string(),
        })?;
    check_stored_token(&ticket, token)?;

    if ticket.status.is_resolved() {
        return Err(Error::StateConflict {
            message: "this RFCO has already been responded to".to_string(),
        });
    }

    // Signature requirement is project-overridable policy
    let require_signature = resolver
        .resolve(
            db,
            "REQUIRE_GC_SIGNATURE_ON_APPROVAL",
            None,
            Some(ticket.project_id),
        )
        .await?
        .and_then(|value| value.as_bool())
        .unwrap_or(false);
    if require_signature && submission.gc_name.is_none() {
        return Err(Error::Validation {
            message: "General Contractor signature is required".to_string(),
        });
    }

    let txn = db.begin().await?;

    // Re-read inside the transaction; a concurrent submission loses here
    let ticket = TnmTicket::find_by_id(ticket_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::TicketNotFound {
            id: ticket_id.to_string(),
        })?;
    check_stored_token(&ticket, token)?;
    if ticket.status.is_resolved() {
        return Err(Error::StateConflict {
            message: "this RFCO has already been responded to".to_string(),
        });
    }

    let now = Utc::now();
    let mut approved_count = 0usize;
    let mut denied_count = 0usize;
    let mut total_approved = Decimal::ZERO;

    for decision in &submission.line_item_approvals {
        line_item_approval::ActiveModel {
            id: Set(Uuid::new_v4()),
            tnm_ticket_id: Set(ticket_id),
            line_item_type: Set(decision.line_item_type.clone()),
            line_item_id: Set(decision.line_item_id),
            status: Set(if decision.approved {
                ApprovalStatus::Approved
            } else {
                ApprovalStatus::Denied
            }),
            approved_amount: Set(decision.approved_amount),
            gc_comment: Set(decision.comment.clone()),
            approved_at: Set(Some(now)),
            approved_by: Set(submission.gc_name.clone()),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        if decision.approved {
            approved_count += 1;
            total_approved += decision.approved_amount.unwrap_or(Decimal::ZERO);
        } else {
            denied_count += 1;
        }
    }

    let new_status = match submission.decision {
        Decision::ApproveAll if submission.line_item_approvals.is_empty() => {
            // Blanket approval without itemized decisions approves the full
            // proposal amount
            total_approved = ticket.proposal_amount;
            TicketStatus::Approved
        }
        Decision::ApproveAll => TicketStatus::Approved,
        Decision::DenyAll => TicketStatus::Denied,
        Decision::Partial => {
            if denied_count == 0 && approved_count > 0 {
                TicketStatus::Approved
            } else if approved_count == 0 && denied_count > 0 {
                TicketStatus::Denied
            } else {
                TicketStatus::PartiallyApproved
            }
        }
    };

    let old_status = ticket.status;
    let tnm_number = ticket.tnm_number.clone();
    let mut active: tnm_ticket::ActiveModel = ticket.into();
    active.status = Set(new_status);
    active.response_date = Set(Some(now.date_naive()));
    active.approved_amount = Set(total_approved);
    // Invalidate the token - one-time use
    active.approval_token = Set(None);
    active.updated_at = Set(now);
    let ticket = active.update(&txn).await?;

    let action = match new_status {
        TicketStatus::Approved => "approve",
        TicketStatus::Denied => "deny",
        _ => "partial_approve",
    };
    crate::core::audit::log(
        &txn,
        "tnm_ticket",
        ticket_id,
        action,
        actor,
        ChangeSet::new()
            .with("status", Some(old_status.as_str()), Some(new_status.as_str()))
            .with(
                "approved_by",
                None::<String>,
                Some(submission.gc_name.clone().unwrap_or_else(|| "Unknown GC".to_string())),
            )
            .with("approved_amount", None::<String>, Some(total_approved.to_string()))
            .with(
                "line_items_approved",
                None::<String>,
                Some(approved_count.to_string()),
            )
            .with(
                "line_items_denied",
                None::<String>,
                Some(denied_count.to_string()),
            ),
    )
    .await?;

    txn.commit().await?;

    // The ticket is resolved - scheduled reminders are now pointless
    let cancelled = scheduler.cancel_for_ticket(ticket_id).await;
    if cancelled > 0 {
        info!("Cancelled {cancelled} reminders for ticket {tnm_number}");
    }

    // Notify the internal team; best-effort like every email
    let internal_email = resolver
        .resolve(db, "COMPANY_EMAIL", None, None)
        .await?
        .map(|value| value.to_string());
    if let Some(internal_email) = internal_email {
        let job = EmailJob::ApprovalConfirmation {
            ticket_id,
            internal_emails: vec![internal_email],
        };
        if let Err(e) = queue.enqueue(job).await {
            error!("Failed to queue approval confirmation for ticket {tnm_number}: {e}");
        }
    }

    info!(
        "Ticket {tnm_number} resolved: {old_status} -> {new_status} ({approved_count} approved, {denied_count} denied)"
    );

    Ok(ApprovalOutcome {
        ticket,
        approved_count,
        denied_count,
        approved_amount: total_approved,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::{line_items, ticket};
    use crate::queue::InMemoryJobQueue;
    use crate::test_utils::*;
    use rust_decimal_macros::dec;

    struct Harness {
        db: DatabaseConnection,
        resolver: SettingsResolver,
        tokens: ApprovalTokens,
        queue: Arc<dyn JobQueue>,
        mem_queue: Arc<InMemoryJobQueue>,
        scheduler: ReminderScheduler,
    }

    async fn harness() -> Result<Harness> {
        let db = setup_test_db().await?;
        let resolver = SettingsResolver::uncached();
        resolver
            .update_global_setting(&db, "DEFAULT_LABOR_OHP", "20.00", None)
            .await?;
        resolver
            .update_global_setting(&db, "COMPANY_EMAIL", "office@example.com", None)
            .await?;
        let mem_queue = Arc::new(InMemoryJobQueue::new());
        let queue = mem_queue.clone() as Arc<dyn JobQueue>;
        Ok(Harness {
            db,
            resolver,
            tokens: ApprovalTokens::new("test-secret-key-for-approval-tokens"),
            scheduler: ReminderScheduler::new(queue.clone()),
            queue,
            mem_queue,
        })
    }

    async fn sent_ticket(h: &Harness) -> Result<(tnm_ticket::Model, String)> {
        let proj = insert_project(&h.db, test_project()).await?;
        let mut model = test_ticket(&proj);
        model.status = TicketStatus::ReadyToSend;
        let model = insert_ticket(&h.db, model).await?;
        let outcome = ticket::send_rfco(
            &h.db,
            &h.resolver,
            &h.tokens,
            &h.queue,
            model.id,
            None,
            &crate::core::audit::Actor::user("u1"),
        )
        .await?;
        Ok((outcome.ticket, outcome.approval_token))
    }

    fn approve_all(items: Vec<LineItemDecision>, gc_name: &str) -> ApprovalSubmission {
        ApprovalSubmission {
            decision: Decision::ApproveAll,
            line_item_approvals: items,
            gc_name: Some(gc_name.to_string()),
            gc_comment: None,
        }
    }

    #[tokio::test]
    async fn test_verify_link_records_first_view() -> Result<()> {
        let h = harness().await?;
        let (sent, token) = sent_ticket(&h).await?;

        let view = verify_approval_link(&h.db, &h.tokens, &token, &Actor::gc()).await?;
        assert_eq!(view.ticket.status, TicketStatus::Viewed);
        assert!(view.ticket.viewed_at.is_some());
        assert!(!view.already_responded);
        assert_eq!(view.project.id, sent.project_id);
        Ok(())
    }

    #[tokio::test]
    async fn test_verify_link_rejects_foreign_and_stale_tokens() -> Result<()> {
        let h = harness().await?;
        let (sent, _token) = sent_ticket(&h).await?;

        // Well-signed token for a different (nonexistent) ticket
        let (foreign, _) = h.tokens.issue_with_expiry(Uuid::new_v4(), 24)?;
        let result = verify_approval_link(&h.db, &h.tokens, &foreign, &Actor::gc()).await;
        assert!(matches!(result.unwrap_err(), Error::TicketNotFound { id: _ }));

        // Token for the right ticket that no longer matches the stored one
        let (stale, _) = h.tokens.issue_with_expiry(sent.id, 24)?;
        let result = verify_approval_link(&h.db, &h.tokens, &stale, &Actor::gc()).await;
        assert!(matches!(result.unwrap_err(), Error::TokenInvalid { reason: _ }));
        Ok(())
    }

    #[tokio::test]
    async fn test_submission_aggregates_mixed_decisions() -> Result<()> {
        let h = harness().await?;
        let (sent, token) = sent_ticket(&h).await?;

        let submission = ApprovalSubmission {
            decision: Decision::Partial,
            line_item_approvals: vec![
                LineItemDecision {
                    line_item_type: "labor".to_string(),
                    line_item_id: Uuid::new_v4(),
                    approved: true,
                    approved_amount: Some(dec!(400.00)),
                    comment: None,
                },
                LineItemDecision {
                    line_item_type: "material".to_string(),
                    line_item_id: Uuid::new_v4(),
                    approved: false,
                    approved_amount: None,
                    comment: Some("price too high".to_string()),
                },
            ],
            gc_name: Some("Pat Doyle".to_string()),
            gc_comment: None,
        };

        let outcome = submit_approval(
            &h.db, &h.resolver, &h.tokens, &h.queue, &h.scheduler, &token, submission,
            &Actor::gc(),
        )
        .await?;
        assert_eq!(outcome.ticket.status, TicketStatus::PartiallyApproved);
        assert_eq!(outcome.approved_count, 1);
        assert_eq!(outcome.denied_count, 1);
        assert_eq!(outcome.approved_amount, dec!(400.00));
        assert_eq!(outcome.ticket.approved_amount, dec!(400.00));

        // Per-item decisions persisted
        let records = crate::entities::LineItemApproval::find().all(&h.db).await?;
        assert_eq!(records.len(), 2);
        assert!(records.iter().any(|r| r.status == ApprovalStatus::Denied));
        let _ = sent;
        Ok(())
    }

    #[tokio::test]
    async fn test_all_denied_resolves_to_denied() -> Result<()> {
        let h = harness().await?;
        let (_sent, token) = sent_ticket(&h).await?;

        let submission = ApprovalSubmission {
            decision: Decision::DenyAll,
            line_item_approvals: vec![LineItemDecision {
                line_item_type: "labor".to_string(),
                line_item_id: Uuid::new_v4(),
                approved: false,
                approved_amount: None,
                comment: None,
            }],
            gc_name: None,
            gc_comment: None,
        };

        let outcome = submit_approval(
            &h.db, &h.resolver, &h.tokens, &h.queue, &h.scheduler, &token, submission,
            &Actor::gc(),
        )
        .await?;
        assert_eq!(outcome.ticket.status, TicketStatus::Denied);
        assert_eq!(outcome.ticket.approved_amount, Decimal::ZERO);
        Ok(())
    }

    #[tokio::test]
    async fn test_submission_cancels_scheduled_reminders() -> Result<()> {
        let h = harness().await?;
        h.resolver
            .update_global_setting(&h.db, "REMINDER_INTERVAL_DAYS", "7", None)
            .await?;
        let (sent, token) = sent_ticket(&h).await?;

        h.scheduler
            .schedule_first(&h.db, &h.resolver, &sent, "gc@example.com", &token)
            .await?;
        assert_eq!(h.scheduler.scheduled_count(sent.id).await, 1);

        submit_approval(
            &h.db,
            &h.resolver,
            &h.tokens,
            &h.queue,
            &h.scheduler,
            &token,
            approve_all(vec![], "Pat"),
            &Actor::gc(),
        )
        .await?;

        assert_eq!(h.scheduler.scheduled_count(sent.id).await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_signature_requirement_enforced() -> Result<()> {
        let h = harness().await?;
        h.resolver
            .update_global_setting(&h.db, "REQUIRE_GC_SIGNATURE_ON_APPROVAL", "true", None)
            .await?;
        let (_sent, token) = sent_ticket(&h).await?;

        let mut submission = approve_all(vec![], "Pat");
        submission.gc_name = None;
        let result = submit_approval(
            &h.db, &h.resolver, &h.tokens, &h.queue, &h.scheduler, &token, submission,
            &Actor::gc(),
        )
        .await;
        assert!(matches!(
            result.unwrap_err(),
            Error::Validation { message: _ }
        ));
        Ok(())
    }

    /// The full workflow: create -> cost -> send -> view -> approve ->
    /// replay-reject -> paid -> unpaid.
    #[tokio::test]
    async fn test_end_to_end_approval_workflow() -> Result<()> {
        let h = harness().await?;
        let admin = crate::core::audit::Actor::user("admin");

        let proj = insert_project(&h.db, test_project()).await?;
        let created = ticket::create_ticket(
            &h.db,
            &h.resolver,
            ticket::NewTicket {
                project_id: proj.id,
                title: "Reframe stairwell opening".to_string(),
                description: None,
                submitter_name: "Foreman".to_string(),
                submitter_email: "foreman@example.com".to_string(),
                proposal_date: Utc::now().date_naive(),
                due_date: None,
            },
            &admin,
        )
        .await?;
        assert_eq!(created.labor_ohp_percent, Some(dec!(20.00)));

        // One labor item: 10 hours @ $57/hr with 20% OH&P
        let (_, costed) = line_items::create_labor_item(
            &h.db,
            &h.resolver,
            line_items::NewLaborItem {
                tnm_ticket_id: created.id,
                description: "Carpentry".to_string(),
                hours: dec!(10),
                labor_type: crate::entities::LaborType::Carpenter,
                rate_per_hour: Some(dec!(57.00)),
                line_order: 0,
            },
        )
        .await?;
        assert_eq!(costed.labor_subtotal, dec!(570.00));
        assert_eq!(costed.labor_total, dec!(684.00));
        assert_eq!(costed.proposal_amount, dec!(684.00));

        // Ready and send
        ticket::update_status(&h.db, created.id, TicketStatus::ReadyToSend, &admin).await?;
        let sent = ticket::send_rfco(
            &h.db, &h.resolver, &h.tokens, &h.queue, created.id, None, &admin,
        )
        .await?;
        assert_eq!(sent.ticket.status, TicketStatus::Sent);
        assert_eq!(h.mem_queue.ready_len().await, 1);
        let token = sent.approval_token;

        // GC opens the link
        let view = verify_approval_link(&h.db, &h.tokens, &token, &Actor::gc()).await?;
        assert_eq!(view.ticket.status, TicketStatus::Viewed);
        assert_eq!(view.items.labor.len(), 1);

        // GC approves everything
        let outcome = submit_approval(
            &h.db,
            &h.resolver,
            &h.tokens,
            &h.queue,
            &h.scheduler,
            &token,
            approve_all(
                vec![LineItemDecision {
                    line_item_type: "labor".to_string(),
                    line_item_id: view.items.labor[0].id,
                    approved: true,
                    approved_amount: Some(dec!(684.00)),
                    comment: None,
                }],
                "Pat Doyle",
            ),
            &Actor::gc(),
        )
        .await?;
        assert_eq!(outcome.ticket.status, TicketStatus::Approved);
        assert_eq!(outcome.ticket.approved_amount, dec!(684.00));
        assert_eq!(outcome.ticket.approval_token, None);
        assert!(outcome.ticket.response_date.is_some());

        // Replaying the same token is rejected as invalid, not as missing
        let replay = submit_approval(
            &h.db,
            &h.resolver,
            &h.tokens,
            &h.queue,
            &h.scheduler,
            &token,
            approve_all(vec![], "Pat Doyle"),
            &Actor::gc(),
        )
        .await;
        assert!(matches!(replay.unwrap_err(), Error::TokenInvalid { reason: _ }));

        // Paid, then unpaid
        let paid = ticket::mark_paid(&h.db, created.id, true, &admin).await?;
        assert_eq!(paid.is_paid, 1);
        assert!(paid.paid_date.is_some());
        let unpaid = ticket::mark_paid(&h.db, created.id, false, &admin).await?;
        assert_eq!(unpaid.is_paid, 0);
        assert_eq!(unpaid.paid_date, None);
        Ok(())
    }
}
