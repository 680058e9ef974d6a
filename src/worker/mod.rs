//! Background email worker.
//!
//! Consumes email jobs from the queue, renders and sends them, writes the
//! email log, then drives the follow-on side effects: tracking counters and
//! next-reminder scheduling. Failed initial sends retry on a 5/15/30 minute
//! backoff and then give up for good - the ticket was already marked `sent`
//! when the operator hit send, and that state change is never rolled back
//! over a mail failure. Reminder jobs re-check ticket status right before
//! sending, so a reminder racing a cancellation resolves to a skip.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::{Set, prelude::*};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    core::settings::SettingsResolver,
    entities::{
        Project, TicketStatus, TnmTicket, email_log, project, tnm_ticket,
    },
    errors::{Error, Result},
    mailer::{EmailTransport, OutboundEmail, templates},
    queue::{EmailJob, JobQueue, ReminderScheduler},
};

/// Backoff schedule for failed initial sends, in minutes. The job gives up
/// permanently once the schedule is exhausted.
pub const INITIAL_SEND_RETRY_MINUTES: [i64; 3] = [5, 15, 30];

/// The background email dispatch worker.
#[derive(Debug)]
pub struct EmailWorker {
    db: DatabaseConnection,
    queue: Arc<dyn JobQueue>,
    scheduler: ReminderScheduler,
    resolver: Arc<SettingsResolver>,
    transport: Arc<dyn EmailTransport>,
    /// Base URL for GC-facing approval links
    frontend_url: String,
    poll_interval: Duration,
}

impl EmailWorker {
    #[must_use]
    pub fn new(
        db: DatabaseConnection,
        queue: Arc<dyn JobQueue>,
        resolver: Arc<SettingsResolver>,
        transport: Arc<dyn EmailTransport>,
        frontend_url: String,
    ) -> Self {
        Self {
            scheduler: ReminderScheduler::new(queue.clone()),
            db,
            queue,
            resolver,
            transport,
            frontend_url,
            poll_interval: Duration::from_secs(5),
        }
    }

    /// Runs the worker loop forever, polling the queue.
    pub async fn run(&self) {
        info!("Email worker started (poll interval {:?})", self.poll_interval);
        loop {
            match self.tick().await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(self.poll_interval).await,
                Err(e) => {
                    error!("Worker tick failed: {e}");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Processes at most one due job. Returns whether a job was processed.
    /// Job-level failures are handled inside (logged, retried per policy) -
    /// only queue access errors surface here.
    pub async fn tick(&self) -> Result<bool> {
        let Some(job) = self.queue.pop_due().await? else {
            return Ok(false);
        };

        let kind = job.kind();
        let ticket_id = job.ticket_id();
        if let Err(e) = self.process(job).await {
            // No synchronous caller to surface this to - the email log row
            // and the tracing output are the record
            error!("Error processing {kind} job for ticket {ticket_id}: {e}");
        }
        Ok(true)
    }

    async fn process(&self, job: EmailJob) -> Result<()> {
        match job {
            EmailJob::InitialSend {
                ticket_id,
                to_email,
                approval_token,
                retry_count,
            } => {
                self.handle_initial_send(ticket_id, to_email, approval_token, retry_count)
                    .await
            }
            EmailJob::Reminder {
                ticket_id,
                to_email,
                approval_token,
                reminder_number,
            } => {
                self.handle_reminder(ticket_id, to_email, approval_token, reminder_number)
                    .await
            }
            EmailJob::ApprovalConfirmation {
                ticket_id,
                internal_emails,
            } => self.handle_confirmation(ticket_id, &internal_emails).await,
        }
    }

    async fn load_ticket_and_project(
        &self,
        ticket_id: Uuid,
    ) -> Result<(tnm_ticket::Model, project::Model)> {
        let ticket = TnmTicket::find_by_id(ticket_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| Error::TicketNotFound {
                id: ticket_id.to_string(),
            })?;
        let proj = Project::find_by_id(ticket.project_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| Error::ProjectNotFound {
                id: ticket.project_id.to_string(),
            })?;
        Ok((ticket, proj))
    }

    async fn logo_url(&self) -> Result<Option<String>> {
        Ok(self
            .resolver
            .resolve(&self.db, "COMPANY_LOGO_URL", None, None)
            .await?
            .map(|value| value.to_string())
            .filter(|url| !url.is_empty()))
    }

    async fn from_email(&self) -> Result<String> {
        Ok(self
            .resolver
            .resolve(&self.db, "SMTP_FROM_EMAIL", None, None)
            .await?
            .map(|value| value.to_string())
            .unwrap_or_default())
    }

    /// Writes one email-log row for a completed attempt.
    async fn log_email(
        &self,
        ticket_id: Uuid,
        to_email: &str,
        subject: &str,
        html: &str,
        email_type: &str,
        sent: bool,
        error_message: Option<String>,
    ) -> Result<()> {
        let now = Utc::now();
        email_log::ActiveModel {
            id: Set(Uuid::new_v4()),
            tnm_ticket_id: Set(Some(ticket_id)),
            to_email: Set(to_email.to_string()),
            from_email: Set(self.from_email().await?),
            subject: Set(subject.to_string()),
            body_text: Set(None),
            body_html: Set(Some(html.to_string())),
            email_type: Set(email_type.to_string()),
            status: Set(if sent { "sent" } else { "failed" }.to_string()),
            error_message: Set(error_message),
            sent_at: Set(sent.then_some(now)),
            created_at: Set(now),
        }
        .insert(&self.db)
        .await?;
        Ok(())
    }

    /// Stamps the ticket's send/reminder counters after a successful
    /// delivery. Also nudges a lingering `ready_to_send` to `sent` in case
    /// the send-side update raced.
    async fn update_tracking(&self, ticket_id: Uuid, is_reminder: bool) -> Result<tnm_ticket::Model> {
        let ticket = TnmTicket::find_by_id(ticket_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| Error::TicketNotFound {
                id: ticket_id.to_string(),
            })?;

        let now = Utc::now();
        let reminder_count = ticket.reminder_count;
        let status = ticket.status;
        let mut active: tnm_ticket::ActiveModel = ticket.into();
        if is_reminder {
            active.reminder_count = Set(reminder_count + 1);
            active.last_reminder_sent_at = Set(Some(now));
        } else {
            active.last_email_sent_at = Set(Some(now));
            if status == TicketStatus::ReadyToSend {
                active.status = Set(TicketStatus::Sent);
            }
        }
        active.updated_at = Set(now);
        active.update(&self.db).await.map_err(Into::into)
    }

    async fn handle_initial_send(
        &self,
        ticket_id: Uuid,
        to_email: String,
        approval_token: String,
        retry_count: u32,
    ) -> Result<()> {
        info!("Processing RFCO email job for ticket {ticket_id} (attempt {})", retry_count + 1);
        let (ticket, proj) = self.load_ticket_and_project(ticket_id).await?;

        let approval_link = format!("{}/approval/{}", self.frontend_url, approval_token);
        let settings =
            templates::load_template_settings(&self.db, &self.resolver, "initial_send").await?;
        let logo_url = self.logo_url().await?;
        let content =
            templates::render_rfco_email(&ticket, &proj, &approval_link, logo_url.as_deref(), &settings);

        let outcome = self
            .transport
            .send(&OutboundEmail {
                to: to_email.clone(),
                subject: content.subject.clone(),
                html_body: content.html.clone(),
                text_body: None,
            })
            .await;

        self.log_email(
            ticket_id,
            &to_email,
            &content.subject,
            &content.html,
            "initial_send",
            outcome.is_ok(),
            outcome.as_ref().err().map(ToString::to_string),
        )
        .await?;

        match outcome {
            Ok(()) => {
                let ticket = self.update_tracking(ticket_id, false).await?;
                self.scheduler
                    .schedule_first(&self.db, &self.resolver, &ticket, &to_email, &approval_token)
                    .await?;
                info!("Sent RFCO email for ticket {}", ticket.tnm_number);
                Ok(())
            }
            Err(e) => {
                let attempt = retry_count as usize;
                if let Some(delay) = INITIAL_SEND_RETRY_MINUTES.get(attempt) {
                    let run_at = Utc::now() + chrono::Duration::minutes(*delay);
                    self.queue
                        .schedule_at(
                            run_at,
                            EmailJob::InitialSend {
                                ticket_id,
                                to_email,
                                approval_token,
                                retry_count: retry_count + 1,
                            },
                        )
                        .await?;
                    warn!(
                        "RFCO email for ticket {} failed ({e}); retry {} at {run_at}",
                        ticket.tnm_number,
                        retry_count + 1
                    );
                } else {
                    // Out of retries. The ticket stays `sent` - delivery is
                    // best-effort once the operator committed to sending.
                    error!(
                        "Giving up on RFCO email for ticket {} after {} attempts: {e}",
                        ticket.tnm_number,
                        retry_count + 1
                    );
                }
                Ok(())
            }
        }
    }

    /// Whether a reminder should still go out for this ticket.
    fn reminder_still_wanted(ticket: &tnm_ticket::Model) -> bool {
        if ticket.send_reminders_until_paid {
            ticket.paid_date.is_none()
        } else if ticket.send_reminders_until_accepted {
            !(ticket.status.is_resolved() || ticket.status == TicketStatus::Cancelled)
        } else {
            ticket.status.is_awaiting_response()
        }
    }

    async fn handle_reminder(
        &self,
        ticket_id: Uuid,
        to_email: String,
        approval_token: String,
        reminder_number: u32,
    ) -> Result<()> {
        info!("Processing reminder #{reminder_number} for ticket {ticket_id}");
        let (ticket, proj) = self.load_ticket_and_project(ticket_id).await?;

        // Double-check right before sending: cancellation may have raced the
        // schedule, or the GC may have responded since this job was parked
        if !Self::reminder_still_wanted(&ticket) {
            info!(
                "Ticket {} is {} - skipping reminder #{reminder_number}",
                ticket.tnm_number, ticket.status
            );
            return Ok(());
        }

        let days_pending = (Utc::now() - ticket.created_at).num_days();
        let approval_link = format!("{}/approval/{}", self.frontend_url, approval_token);
        let settings =
            templates::load_template_settings(&self.db, &self.resolver, "reminder").await?;
        let logo_url = self.logo_url().await?;
        let content = templates::render_reminder_email(
            &ticket,
            &proj,
            &approval_link,
            reminder_number,
            days_pending,
            logo_url.as_deref(),
            &settings,
        );

        let outcome = self
            .transport
            .send(&OutboundEmail {
                to: to_email.clone(),
                subject: content.subject.clone(),
                html_body: content.html.clone(),
                text_body: None,
            })
            .await;

        self.log_email(
            ticket_id,
            &to_email,
            &content.subject,
            &content.html,
            "reminder",
            outcome.is_ok(),
            outcome.as_ref().err().map(ToString::to_string),
        )
        .await?;

        match outcome {
            Ok(()) => {
                let ticket = self.update_tracking(ticket_id, true).await?;
                self.scheduler
                    .schedule_next(
                        &self.db,
                        &self.resolver,
                        &ticket,
                        &to_email,
                        &approval_token,
                        reminder_number,
                        false,
                    )
                    .await?;
                info!(
                    "Sent reminder #{reminder_number} for ticket {}",
                    ticket.tnm_number
                );
            }
            Err(e) => {
                // With a continuation flag active the same reminder number
                // comes back on a short fixed delay; under the default
                // policy the failure is logged and the chain ends here
                if ticket.send_reminders_until_paid || ticket.send_reminders_until_accepted {
                    self.scheduler
                        .schedule_retry(&ticket, &to_email, &approval_token, reminder_number)
                        .await?;
                } else {
                    error!(
                        "Reminder #{reminder_number} for ticket {} failed: {e}",
                        ticket.tnm_number
                    );
                }
            }
        }
        Ok(())
    }

    async fn handle_confirmation(
        &self,
        ticket_id: Uuid,
        internal_emails: &[String],
    ) -> Result<()> {
        info!("Processing approval confirmation for ticket {ticket_id}");
        let (ticket, proj) = self.load_ticket_and_project(ticket_id).await?;

        let ticket_link = format!("{}/tickets/{}", self.frontend_url, ticket_id);
        let settings =
            templates::load_template_settings(&self.db, &self.resolver, "approval_confirmation")
                .await?;
        let logo_url = self.logo_url().await?;
        let content = templates::render_approval_confirmation_email(
            &ticket,
            &proj,
            &ticket_link,
            logo_url.as_deref(),
            &settings,
        );

        for email in internal_emails {
            let outcome = self
                .transport
                .send(&OutboundEmail {
                    to: email.clone(),
                    subject: content.subject.clone(),
                    html_body: content.html.clone(),
                    text_body: None,
                })
                .await;
            self.log_email(
                ticket_id,
                email,
                &content.subject,
                &content.html,
                "approval_confirmation",
                outcome.is_ok(),
                outcome.as_ref().err().map(ToString::to_string),
            )
            .await?;
            if let Err(e) = outcome {
                warn!("Approval confirmation to {email} failed: {e}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::queue::InMemoryJobQueue;
    use crate::test_utils::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    /// Transport that records every send and can fail the first N attempts.
    #[derive(Debug, Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<OutboundEmail>>,
        failures_remaining: AtomicUsize,
    }

    impl RecordingTransport {
        fn failing(times: usize) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                failures_remaining: AtomicUsize::new(times),
            }
        }
    }

    #[async_trait]
    impl EmailTransport for RecordingTransport {
        async fn send(&self, email: &OutboundEmail) -> Result<()> {
            let remaining = self.failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
                return Err(Error::Email {
                    message: "simulated SMTP failure".to_string(),
                });
            }
            self.sent.lock().await.push(email.clone());
            Ok(())
        }
    }

    struct WorkerHarness {
        db: DatabaseConnection,
        queue: Arc<InMemoryJobQueue>,
        transport: Arc<RecordingTransport>,
        worker: EmailWorker,
        ticket: tnm_ticket::Model,
    }

    async fn setup_worker(transport: RecordingTransport) -> Result<WorkerHarness> {
        let db = setup_test_db().await?;
        let resolver = Arc::new(crate::core::settings::SettingsResolver::uncached());
        resolver
            .update_global_setting(&db, "REMINDER_ENABLED", "true", None)
            .await?;
        resolver
            .update_global_setting(&db, "REMINDER_INTERVAL_DAYS", "7", None)
            .await?;
        resolver
            .update_global_setting(&db, "REMINDER_MAX_RETRIES", "4", None)
            .await?;

        let queue = Arc::new(InMemoryJobQueue::new());
        let transport = Arc::new(transport);

        let project = insert_project(&db, test_project()).await?;
        let mut ticket = test_ticket(&project);
        ticket.status = TicketStatus::Sent;
        ticket.approval_token = Some("tok".to_string());
        let ticket = insert_ticket(&db, ticket).await?;

        let worker = EmailWorker::new(
            db.clone(),
            queue.clone() as Arc<dyn JobQueue>,
            resolver,
            transport.clone() as Arc<dyn EmailTransport>,
            "https://rfco.example.com".to_string(),
        );

        Ok(WorkerHarness {
            db,
            queue,
            transport,
            worker,
            ticket,
        })
    }

    #[tokio::test]
    async fn test_initial_send_success_schedules_first_reminder() -> Result<()> {
        let h = setup_worker(RecordingTransport::default()).await?;
        h.queue
            .enqueue(EmailJob::InitialSend {
                ticket_id: h.ticket.id,
                to_email: "gc@example.com".to_string(),
                approval_token: "tok".to_string(),
                retry_count: 0,
            })
            .await?;

        assert!(h.worker.tick().await?);

        let sent = h.transport.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].html_body.contains("/approval/tok"));
        drop(sent);

        // First reminder parked for later
        assert_eq!(h.queue.scheduled_len().await, 1);

        // Email log records the delivery
        let logs = crate::entities::EmailLog::find().all(&h.db).await?;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, "sent");
        assert_eq!(logs[0].email_type, "initial_send");
        Ok(())
    }

    #[tokio::test]
    async fn test_initial_send_failure_backs_off_with_retry() -> Result<()> {
        let h = setup_worker(RecordingTransport::failing(1)).await?;
        h.queue
            .enqueue(EmailJob::InitialSend {
                ticket_id: h.ticket.id,
                to_email: "gc@example.com".to_string(),
                approval_token: "tok".to_string(),
                retry_count: 0,
            })
            .await?;

        assert!(h.worker.tick().await?);

        // Failed attempt logged, retry parked with bumped counter
        let logs = crate::entities::EmailLog::find().all(&h.db).await?;
        assert_eq!(logs[0].status, "failed");
        let parked = h.queue.scheduled_jobs_for_ticket(h.ticket.id).await?;
        assert_eq!(parked.len(), 1);
        assert!(matches!(
            parked[0].job,
            EmailJob::InitialSend { retry_count: 1, .. }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_initial_send_gives_up_after_retry_cap() -> Result<()> {
        let h = setup_worker(RecordingTransport::failing(10)).await?;
        h.queue
            .enqueue(EmailJob::InitialSend {
                ticket_id: h.ticket.id,
                to_email: "gc@example.com".to_string(),
                approval_token: "tok".to_string(),
                retry_count: 3,
            })
            .await?;

        assert!(h.worker.tick().await?);

        // No further retry parked; ticket still sent
        assert_eq!(h.queue.scheduled_len().await, 0);
        let ticket = crate::entities::TnmTicket::find_by_id(h.ticket.id)
            .one(&h.db)
            .await?
            .unwrap();
        assert_eq!(ticket.status, TicketStatus::Sent);
        Ok(())
    }

    #[tokio::test]
    async fn test_reminder_success_bumps_count_and_schedules_next() -> Result<()> {
        let h = setup_worker(RecordingTransport::default()).await?;
        h.queue
            .enqueue(EmailJob::Reminder {
                ticket_id: h.ticket.id,
                to_email: "gc@example.com".to_string(),
                approval_token: "tok".to_string(),
                reminder_number: 1,
            })
            .await?;

        assert!(h.worker.tick().await?);

        let ticket = crate::entities::TnmTicket::find_by_id(h.ticket.id)
            .one(&h.db)
            .await?
            .unwrap();
        assert_eq!(ticket.reminder_count, 1);
        assert!(ticket.last_reminder_sent_at.is_some());

        let parked = h.queue.scheduled_jobs_for_ticket(h.ticket.id).await?;
        assert_eq!(parked.len(), 1);
        assert!(matches!(
            parked[0].job,
            EmailJob::Reminder { reminder_number: 2, .. }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_reminder_skipped_for_resolved_ticket() -> Result<()> {
        let h = setup_worker(RecordingTransport::default()).await?;

        // Resolve the ticket before the reminder fires
        let mut active: tnm_ticket::ActiveModel = h.ticket.clone().into();
        active.status = Set(TicketStatus::Approved);
        active.update(&h.db).await?;

        h.queue
            .enqueue(EmailJob::Reminder {
                ticket_id: h.ticket.id,
                to_email: "gc@example.com".to_string(),
                approval_token: "tok".to_string(),
                reminder_number: 2,
            })
            .await?;

        assert!(h.worker.tick().await?);

        assert!(h.transport.sent.lock().await.is_empty());
        assert_eq!(h.queue.scheduled_len().await, 0);
        let ticket = crate::entities::TnmTicket::find_by_id(h.ticket.id)
            .one(&h.db)
            .await?
            .unwrap();
        assert_eq!(ticket.reminder_count, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_reminder_failure_retries_under_continuation_flag() -> Result<()> {
        let h = setup_worker(RecordingTransport::failing(1)).await?;

        let mut active: tnm_ticket::ActiveModel = h.ticket.clone().into();
        active.send_reminders_until_paid = Set(true);
        active.update(&h.db).await?;

        h.queue
            .enqueue(EmailJob::Reminder {
                ticket_id: h.ticket.id,
                to_email: "gc@example.com".to_string(),
                approval_token: "tok".to_string(),
                reminder_number: 2,
            })
            .await?;

        assert!(h.worker.tick().await?);

        // Same reminder number parked again on the short retry delay
        let parked = h.queue.scheduled_jobs_for_ticket(h.ticket.id).await?;
        assert_eq!(parked.len(), 1);
        assert!(matches!(
            parked[0].job,
            EmailJob::Reminder { reminder_number: 2, .. }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_confirmation_fans_out_to_internal_emails() -> Result<()> {
        let h = setup_worker(RecordingTransport::default()).await?;
        h.queue
            .enqueue(EmailJob::ApprovalConfirmation {
                ticket_id: h.ticket.id,
                internal_emails: vec![
                    "office@example.com".to_string(),
                    "pm@example.com".to_string(),
                ],
            })
            .await?;

        assert!(h.worker.tick().await?);

        let sent = h.transport.sent.lock().await;
        assert_eq!(sent.len(), 2);
        drop(sent);
        let logs = crate::entities::EmailLog::find().all(&h.db).await?;
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|l| l.email_type == "approval_confirmation"));
        Ok(())
    }
}
