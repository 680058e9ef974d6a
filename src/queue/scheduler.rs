//! Reminder scheduling.
//!
//! Reminders are delayed jobs on the queue. The scheduler decides whether to
//! park the next one based on the ticket's continuation flags and status:
//! `until_paid` keeps going to payment, `until_accepted` keeps going until
//! the GC responds, the default policy stops once the ticket leaves the
//! awaiting-response set or hits the retry cap. Cancellation is a best-effort
//! scan of the scheduled registry and never errors - a reminder firing in
//! the same instant is tolerated because the worker re-checks ticket status
//! before sending.

use std::sync::Arc;

use chrono::{Duration, Utc};
use sea_orm::DatabaseConnection;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    core::settings::SettingsResolver,
    entities::{TicketStatus, tnm_ticket},
    errors::Result,
    queue::{EmailJob, JobId, JobQueue},
};

/// Delay before re-attempting a reminder whose send failed while a
/// continuation flag is active.
pub const FAILED_SEND_RETRY_MINUTES: i64 = 60;

/// Why the scheduler declined to park another reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Disabled,
    Paid,
    Resolved,
    MaxRetriesReached,
}

/// Outcome of a scheduling decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Scheduled(JobId),
    Stopped(StopReason),
}

impl ScheduleOutcome {
    #[must_use]
    pub const fn is_scheduled(&self) -> bool {
        matches!(self, Self::Scheduled(_))
    }
}

/// Schedules, reschedules and cancels reminder jobs for tickets.
#[derive(Debug, Clone)]
pub struct ReminderScheduler {
    queue: Arc<dyn JobQueue>,
}

impl ReminderScheduler {
    #[must_use]
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    /// Resolved reminder policy for a ticket's project context.
    async fn policy(
        &self,
        db: &DatabaseConnection,
        resolver: &SettingsResolver,
        project_id: Uuid,
    ) -> Result<(bool, i64, u32)> {
        let enabled = resolver
            .resolve(db, "REMINDER_ENABLED", None, None)
            .await?
            .and_then(|value| value.as_bool())
            .unwrap_or(true);
        let interval_days = resolver
            .resolve(db, "REMINDER_INTERVAL_DAYS", None, Some(project_id))
            .await?
            .and_then(|value| value.as_i64())
            .unwrap_or(0);
        let max_retries = resolver
            .resolve(db, "REMINDER_MAX_RETRIES", None, Some(project_id))
            .await?
            .and_then(|value| value.as_i64())
            .and_then(|value| u32::try_from(value).ok())
            .unwrap_or(0);
        Ok((enabled, interval_days, max_retries))
    }

    /// Schedules reminder #1, called once after a successful initial send.
    /// A zero or absent interval disables the feature entirely.
    pub async fn schedule_first(
        &self,
        db: &DatabaseConnection,
        resolver: &SettingsResolver,
        ticket: &tnm_ticket::Model,
        to_email: &str,
        approval_token: &str,
    ) -> Result<ScheduleOutcome> {
        let (enabled, interval_days, _) = self.policy(db, resolver, ticket.project_id).await?;
        if !enabled || interval_days <= 0 {
            info!("Reminders are disabled; nothing scheduled for {}", ticket.tnm_number);
            return Ok(ScheduleOutcome::Stopped(StopReason::Disabled));
        }

        let run_at = Utc::now() + Duration::days(interval_days);
        let job_id = self
            .queue
            .schedule_at(
                run_at,
                EmailJob::Reminder {
                    ticket_id: ticket.id,
                    to_email: to_email.to_string(),
                    approval_token: approval_token.to_string(),
                    reminder_number: 1,
                },
            )
            .await?;
        info!(
            "Scheduled reminder #1 for ticket {} at {run_at}",
            ticket.tnm_number
        );
        Ok(ScheduleOutcome::Scheduled(job_id))
    }

    /// Decides whether reminder `reminder_number + 1` should follow the one
    /// just sent, and parks it if so.
    ///
    /// Stop rules, in order: `until_paid` runs to payment (cap bypassed);
    /// `until_accepted` runs until the GC resolves the ticket (cap
    /// bypassed); the default policy runs while the ticket is still awaiting
    /// a response and the cap (0 = unlimited) is not exhausted.
    /// `bypass_max_check` lets a caller force continuation past the cap.
    pub async fn schedule_next(
        &self,
        db: &DatabaseConnection,
        resolver: &SettingsResolver,
        ticket: &tnm_ticket::Model,
        to_email: &str,
        approval_token: &str,
        reminder_number: u32,
        bypass_max_check: bool,
    ) -> Result<ScheduleOutcome> {
        let (enabled, interval_days, max_retries) =
            self.policy(db, resolver, ticket.project_id).await?;
        if !enabled || interval_days <= 0 {
            return Ok(ScheduleOutcome::Stopped(StopReason::Disabled));
        }

        let bypass = bypass_max_check
            || ticket.send_reminders_until_paid
            || ticket.send_reminders_until_accepted;

        if ticket.send_reminders_until_paid {
            if ticket.paid_date.is_some() {
                return Ok(ScheduleOutcome::Stopped(StopReason::Paid));
            }
        } else if ticket.send_reminders_until_accepted {
            match ticket.status {
                TicketStatus::Approved | TicketStatus::PartiallyApproved => {
                    return Ok(ScheduleOutcome::Stopped(StopReason::Resolved));
                }
                TicketStatus::Denied | TicketStatus::Cancelled => {
                    return Ok(ScheduleOutcome::Stopped(StopReason::Resolved));
                }
                _ => {}
            }
        } else if !ticket.status.is_awaiting_response() {
            return Ok(ScheduleOutcome::Stopped(StopReason::Resolved));
        }

        // 0 means unlimited retries
        if !bypass && max_retries > 0 && reminder_number >= max_retries {
            info!(
                "Max reminders ({max_retries}) reached for ticket {}",
                ticket.tnm_number
            );
            return Ok(ScheduleOutcome::Stopped(StopReason::MaxRetriesReached));
        }

        let run_at = Utc::now() + Duration::days(interval_days);
        let next_number = reminder_number + 1;
        let job_id = self
            .queue
            .schedule_at(
                run_at,
                EmailJob::Reminder {
                    ticket_id: ticket.id,
                    to_email: to_email.to_string(),
                    approval_token: approval_token.to_string(),
                    reminder_number: next_number,
                },
            )
            .await?;
        info!(
            "Scheduled reminder #{next_number} for ticket {} at {run_at}",
            ticket.tnm_number
        );
        Ok(ScheduleOutcome::Scheduled(job_id))
    }

    /// Re-parks the *same* reminder number after a transport failure, on a
    /// short fixed delay distinct from the normal interval. Only called when
    /// a continuation flag is active - under the default policy a failed
    /// reminder is simply dropped.
    pub async fn schedule_retry(
        &self,
        ticket: &tnm_ticket::Model,
        to_email: &str,
        approval_token: &str,
        reminder_number: u32,
    ) -> Result<JobId> {
        let run_at = Utc::now() + Duration::minutes(FAILED_SEND_RETRY_MINUTES);
        let job_id = self
            .queue
            .schedule_at(
                run_at,
                EmailJob::Reminder {
                    ticket_id: ticket.id,
                    to_email: to_email.to_string(),
                    approval_token: approval_token.to_string(),
                    reminder_number,
                },
            )
            .await?;
        warn!(
            "Reminder #{reminder_number} for ticket {} failed to send; retrying at {run_at}",
            ticket.tnm_number
        );
        Ok(job_id)
    }

    /// Cancels every scheduled reminder for a ticket, returning how many
    /// were removed. Idempotent and infallible: scan errors end the scan
    /// with the count so far.
    pub async fn cancel_for_ticket(&self, ticket_id: Uuid) -> usize {
        let jobs = match self.queue.scheduled_jobs_for_ticket(ticket_id).await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!("Failed to scan scheduled reminders for ticket {ticket_id}: {e}");
                return 0;
            }
        };

        let mut cancelled = 0;
        for entry in jobs {
            if !entry.job.is_reminder() {
                continue;
            }
            match self.queue.cancel(&entry.id).await {
                Ok(true) => cancelled += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to cancel reminder job {}: {e}", entry.id);
                }
            }
        }
        cancelled
    }

    /// Number of reminders currently parked for a ticket.
    pub async fn scheduled_count(&self, ticket_id: Uuid) -> usize {
        match self.queue.scheduled_jobs_for_ticket(ticket_id).await {
            Ok(jobs) => jobs.iter().filter(|entry| entry.job.is_reminder()).count(),
            Err(e) => {
                warn!("Failed to count scheduled reminders for ticket {ticket_id}: {e}");
                0
            }
        }
    }
}
