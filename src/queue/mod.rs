//! Durable job queue seam and the in-process implementation.
//!
//! The core only ever talks to the [`JobQueue`] trait: immediate enqueue,
//! delayed scheduling, cancellation, and a scheduled-jobs-by-ticket query
//! (the reminder scheduler's cancellation scan). The bundled
//! [`InMemoryJobQueue`] backs the single-process deployment and the tests; a
//! broker-backed implementation slots in behind the same trait.

/// Reminder scheduling, stop conditions and cancellation
pub mod scheduler;

pub use scheduler::ReminderScheduler;

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::errors::Result;

/// Opaque queue job identifier.
pub type JobId = String;

/// The three email job kinds the worker consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmailJob {
    /// First RFCO email to the GC after "send"
    InitialSend {
        ticket_id: Uuid,
        to_email: String,
        approval_token: String,
        /// Dispatch attempt counter for the worker's backoff
        retry_count: u32,
    },
    /// Scheduled or manual follow-up while the ticket awaits a response
    Reminder {
        ticket_id: Uuid,
        to_email: String,
        approval_token: String,
        /// 1-based reminder sequence number
        reminder_number: u32,
    },
    /// Internal notification once the GC has responded
    ApprovalConfirmation {
        ticket_id: Uuid,
        internal_emails: Vec<String>,
    },
}

impl EmailJob {
    /// The ticket this job concerns.
    #[must_use]
    pub const fn ticket_id(&self) -> Uuid {
        match self {
            Self::InitialSend { ticket_id, .. }
            | Self::Reminder { ticket_id, .. }
            | Self::ApprovalConfirmation { ticket_id, .. } => *ticket_id,
        }
    }

    /// Stable job kind name for logs and the email log's `email_type`.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InitialSend { .. } => "initial_send",
            Self::Reminder { .. } => "reminder",
            Self::ApprovalConfirmation { .. } => "approval_confirmation",
        }
    }

    #[must_use]
    pub const fn is_reminder(&self) -> bool {
        matches!(self, Self::Reminder { .. })
    }
}

/// A job parked until its `run_at` time.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub id: JobId,
    pub run_at: DateTime<Utc>,
    pub job: EmailJob,
}

/// Queue collaborator consumed by the core and the worker.
#[async_trait]
pub trait JobQueue: Send + Sync + std::fmt::Debug {
    /// Enqueues a job for immediate processing.
    async fn enqueue(&self, job: EmailJob) -> Result<JobId>;

    /// Parks a job until `run_at`.
    async fn schedule_at(&self, run_at: DateTime<Utc>, job: EmailJob) -> Result<JobId>;

    /// Removes a scheduled job. Returns whether anything was removed.
    async fn cancel(&self, job_id: &str) -> Result<bool>;

    /// All still-scheduled jobs touching a ticket.
    async fn scheduled_jobs_for_ticket(&self, ticket_id: Uuid) -> Result<Vec<ScheduledJob>>;

    /// Worker side: promotes due scheduled jobs and pops the next ready one.
    async fn pop_due(&self) -> Result<Option<EmailJob>>;
}

/// Single-process queue: a ready deque plus a scheduled registry, both
/// behind async mutexes. Coordination-free for callers; `pop_due` promotes
/// due scheduled jobs in `run_at` order before popping.
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    ready: Mutex<VecDeque<(JobId, EmailJob)>>,
    scheduled: Mutex<Vec<ScheduledJob>>,
}

impl InMemoryJobQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs ready for immediate processing (test/health surface).
    pub async fn ready_len(&self) -> usize {
        self.ready.lock().await.len()
    }

    /// Number of jobs parked on the schedule (test/health surface).
    pub async fn scheduled_len(&self) -> usize {
        self.scheduled.lock().await.len()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: EmailJob) -> Result<JobId> {
        let id = Uuid::new_v4().to_string();
        debug!("Enqueueing {} job {id} for ticket {}", job.kind(), job.ticket_id());
        self.ready.lock().await.push_back((id.clone(), job));
        Ok(id)
    }

    async fn schedule_at(&self, run_at: DateTime<Utc>, job: EmailJob) -> Result<JobId> {
        let id = Uuid::new_v4().to_string();
        debug!(
            "Scheduling {} job {id} for ticket {} at {run_at}",
            job.kind(),
            job.ticket_id()
        );
        self.scheduled.lock().await.push(ScheduledJob {
            id: id.clone(),
            run_at,
            job,
        });
        Ok(id)
    }

    async fn cancel(&self, job_id: &str) -> Result<bool> {
        let mut scheduled = self.scheduled.lock().await;
        let before = scheduled.len();
        scheduled.retain(|entry| entry.id != job_id);
        Ok(scheduled.len() < before)
    }

    async fn scheduled_jobs_for_ticket(&self, ticket_id: Uuid) -> Result<Vec<ScheduledJob>> {
        let scheduled = self.scheduled.lock().await;
        Ok(scheduled
            .iter()
            .filter(|entry| entry.job.ticket_id() == ticket_id)
            .cloned()
            .collect())
    }

    async fn pop_due(&self) -> Result<Option<EmailJob>> {
        let now = Utc::now();
        {
            let mut scheduled = self.scheduled.lock().await;
            let mut due: Vec<ScheduledJob> = Vec::new();
            scheduled.retain(|entry| {
                if entry.run_at <= now {
                    due.push(entry.clone());
                    false
                } else {
                    true
                }
            });
            if !due.is_empty() {
                due.sort_by_key(|entry| entry.run_at);
                let mut ready = self.ready.lock().await;
                for entry in due {
                    ready.push_back((entry.id, entry.job));
                }
            }
        }
        Ok(self.ready.lock().await.pop_front().map(|(_, job)| job))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use chrono::Duration;

    fn reminder(ticket_id: Uuid, number: u32) -> EmailJob {
        EmailJob::Reminder {
            ticket_id,
            to_email: "gc@example.com".to_string(),
            approval_token: "tok".to_string(),
            reminder_number: number,
        }
    }

    #[tokio::test]
    async fn test_enqueue_then_pop() -> Result<()> {
        let queue = InMemoryJobQueue::new();
        let ticket_id = Uuid::new_v4();

        queue.enqueue(reminder(ticket_id, 1)).await?;
        let popped = queue.pop_due().await?.unwrap();
        assert_eq!(popped.ticket_id(), ticket_id);
        assert!(queue.pop_due().await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_scheduled_job_not_due_stays_parked() -> Result<()> {
        let queue = InMemoryJobQueue::new();
        let ticket_id = Uuid::new_v4();

        queue
            .schedule_at(Utc::now() + Duration::days(7), reminder(ticket_id, 1))
            .await?;
        assert!(queue.pop_due().await?.is_none());
        assert_eq!(queue.scheduled_len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_due_jobs_promote_in_run_at_order() -> Result<()> {
        let queue = InMemoryJobQueue::new();
        let ticket_id = Uuid::new_v4();

        queue
            .schedule_at(Utc::now() - Duration::minutes(1), reminder(ticket_id, 2))
            .await?;
        queue
            .schedule_at(Utc::now() - Duration::minutes(5), reminder(ticket_id, 1))
            .await?;

        let first = queue.pop_due().await?.unwrap();
        assert!(matches!(first, EmailJob::Reminder { reminder_number: 1, .. }));
        let second = queue.pop_due().await?.unwrap();
        assert!(matches!(second, EmailJob::Reminder { reminder_number: 2, .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_removes_scheduled_job() -> Result<()> {
        let queue = InMemoryJobQueue::new();
        let ticket_id = Uuid::new_v4();

        let id = queue
            .schedule_at(Utc::now() + Duration::days(1), reminder(ticket_id, 1))
            .await?;
        assert!(queue.cancel(&id).await?);
        // Second cancel is a no-op
        assert!(!queue.cancel(&id).await?);
        assert_eq!(queue.scheduled_len().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_scheduled_jobs_filtered_by_ticket() -> Result<()> {
        let queue = InMemoryJobQueue::new();
        let ticket_a = Uuid::new_v4();
        let ticket_b = Uuid::new_v4();

        queue
            .schedule_at(Utc::now() + Duration::days(1), reminder(ticket_a, 1))
            .await?;
        queue
            .schedule_at(Utc::now() + Duration::days(1), reminder(ticket_b, 1))
            .await?;

        let for_a = queue.scheduled_jobs_for_ticket(ticket_a).await?;
        assert_eq!(for_a.len(), 1);
        assert_eq!(for_a[0].job.ticket_id(), ticket_a);
        Ok(())
    }
}
