//! Job storage.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::types::{DeadLetterEntry, Job, JobId, JobStatus};

/// Outbox of deferred contract generations.
pub trait JobStore: Send + Sync {
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError>;

    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    fn update(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Claim the oldest job that is ready at `now`, marking it running.
    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, JobStoreError>;

    /// Move a job to the dead-letter queue.
    fn dead_letter(&self, job: Job, reason: String, now: DateTime<Utc>) -> Result<(), JobStoreError>;

    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, JobStoreError>;

    /// Move a dead-lettered job back to pending with a fresh attempt budget.
    fn retry_dead_letter(&self, job_id: JobId, now: DateTime<Utc>) -> Result<Job, JobStoreError>;

    fn stats(&self) -> Result<JobStats, JobStoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

impl<T> From<PoisonError<T>> for JobStoreError {
    fn from(_: PoisonError<T>) -> Self {
        JobStoreError::Storage("job store lock poisoned".to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    dead_letters: RwLock<HashMap<JobId, DeadLetterEntry>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for InMemoryJobStore {
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        let mut jobs = self.jobs.write()?;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        Ok(self.jobs.read()?.get(&job_id).cloned())
    }

    fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write()?;
        match jobs.get_mut(&job.id) {
            Some(slot) => {
                *slot = job.clone();
                Ok(())
            }
            None => Err(JobStoreError::NotFound(job.id)),
        }
    }

    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, JobStoreError> {
        let mut jobs = self.jobs.write()?;

        let next = jobs
            .values()
            .filter(|j| j.is_ready(now))
            .min_by_key(|j| (j.created_at, j.id))
            .map(|j| j.id);

        Ok(next.and_then(|id| jobs.get_mut(&id)).map(|job| {
            job.mark_running(now);
            job.clone()
        }))
    }

    fn dead_letter(&self, mut job: Job, reason: String, now: DateTime<Utc>) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write()?;
        let mut dls = self.dead_letters.write()?;

        job.status = JobStatus::DeadLettered {
            error: reason.clone(),
            attempts: job.attempt,
        };
        job.updated_at = now;

        jobs.remove(&job.id);
        dls.insert(
            job.id,
            DeadLetterEntry {
                job,
                dead_lettered_at: now,
                reason,
            },
        );
        Ok(())
    }

    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, JobStoreError> {
        let dls = self.dead_letters.read()?;
        let mut result: Vec<_> = dls.values().cloned().collect();
        result.sort_by_key(|e| (e.dead_lettered_at, e.job.id));
        result.truncate(limit);
        Ok(result)
    }

    fn retry_dead_letter(&self, job_id: JobId, now: DateTime<Utc>) -> Result<Job, JobStoreError> {
        let mut jobs = self.jobs.write()?;
        let mut dls = self.dead_letters.write()?;

        let entry = dls.remove(&job_id).ok_or(JobStoreError::NotFound(job_id))?;

        let mut job = entry.job;
        job.status = JobStatus::Pending;
        job.attempt = 0;
        job.scheduled_at = None;
        job.updated_at = now;

        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        let jobs = self.jobs.read()?;
        let dls = self.dead_letters.read()?;

        let mut stats = JobStats {
            dead_lettered: dls.len(),
            ..JobStats::default()
        };
        for job in jobs.values() {
            match &job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed { .. } => stats.failed += 1,
                JobStatus::DeadLettered { .. } => stats.dead_lettered += 1,
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::{ContractTarget, RetryPolicy};
    use scf_financing::OfferId;
    use std::time::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_770_000_000 + secs, 0).unwrap()
    }

    fn job(created: i64) -> Job {
        Job::new(
            ContractTarget::SelfFundedOffer {
                offer_id: OfferId::generate(),
            },
            RetryPolicy::fixed(3, Duration::from_secs(30)),
            at(created),
        )
    }

    #[test]
    fn claim_next_is_fifo_and_marks_running() {
        let store = InMemoryJobStore::new();
        let older = store.enqueue(job(0)).unwrap();
        let newer = store.enqueue(job(1)).unwrap();

        let claimed = store.claim_next(at(2)).unwrap().unwrap();
        assert_eq!(claimed.id, older);
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.attempt, 1);

        let claimed = store.claim_next(at(2)).unwrap().unwrap();
        assert_eq!(claimed.id, newer);
        assert!(store.claim_next(at(2)).unwrap().is_none());
    }

    #[test]
    fn backoff_hides_failed_jobs_until_due() {
        let store = InMemoryJobStore::new();
        store.enqueue(job(0)).unwrap();

        let mut claimed = store.claim_next(at(0)).unwrap().unwrap();
        claimed.mark_failed("boom".into(), at(0), at(0));
        store.update(&claimed).unwrap();

        assert!(store.claim_next(at(10)).unwrap().is_none());
        assert!(store.claim_next(at(30)).unwrap().is_some());
    }

    #[test]
    fn retried_dead_letter_is_claimable_again() {
        let store = InMemoryJobStore::new();
        let id = store.enqueue(job(0)).unwrap();
        let claimed = store.claim_next(at(0)).unwrap().unwrap();
        store.dead_letter(claimed, "missing offer".into(), at(1)).unwrap();

        assert_eq!(store.stats().unwrap().dead_lettered, 1);
        let listed = store.list_dead_letters(10).unwrap();
        assert_eq!(listed[0].reason, "missing offer");

        let revived = store.retry_dead_letter(id, at(2)).unwrap();
        assert_eq!(revived.attempt, 0);
        assert_eq!(store.claim_next(at(2)).unwrap().unwrap().id, id);
        assert!(matches!(
            store.retry_dead_letter(id, at(3)),
            Err(JobStoreError::NotFound(_))
        ));
    }
}
