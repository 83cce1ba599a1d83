//! In-memory queue backend for tests and single-process deployments.
//!
//! One mutex guards the record map and all four indices, so every
//! operation is trivially atomic. Record expiry is evaluated lazily on read.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use super::job::{Job, JobId, JobStatus, Lease};
use super::queue::{QueueBackend, QueueStats, QueueTotals};
use crate::error::{MdusError, Result};

/// Pending order: higher priority first, then enqueue sequence.
type PendingScore = (Reverse<i32>, u64);

/// A set of job ids ordered by score, with O(log n) removal by id.
#[derive(Debug)]
struct ScoredIndex<S: Ord + Copy> {
    ordered: BTreeSet<(S, JobId)>,
    scores: HashMap<JobId, S>,
}

impl<S: Ord + Copy> Default for ScoredIndex<S> {
    fn default() -> Self {
        Self {
            ordered: BTreeSet::new(),
            scores: HashMap::new(),
        }
    }
}

impl<S: Ord + Copy> ScoredIndex<S> {
    fn insert(&mut self, id: JobId, score: S) {
        self.remove(id);
        self.ordered.insert((score, id));
        self.scores.insert(id, score);
    }

    fn remove(&mut self, id: JobId) -> bool {
        match self.scores.remove(&id) {
            Some(score) => self.ordered.remove(&(score, id)),
            None => false,
        }
    }

    fn pop_first(&mut self) -> Option<JobId> {
        let (_, id) = self.ordered.pop_first()?;
        self.scores.remove(&id);
        Some(id)
    }

    fn contains(&self, id: JobId) -> bool {
        self.scores.contains_key(&id)
    }

    fn up_to(&self, max: S) -> impl Iterator<Item = JobId> + '_ {
        self.ordered
            .iter()
            .take_while(move |(score, _)| *score <= max)
            .map(|(_, id)| *id)
    }

    fn len(&self) -> u64 {
        self.scores.len() as u64
    }
}

#[derive(Debug)]
struct StoredJob {
    job: Job,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    records: HashMap<JobId, StoredJob>,
    pending: ScoredIndex<PendingScore>,
    processing: ScoredIndex<i64>,
    completed: ScoredIndex<i64>,
    failed: ScoredIndex<i64>,
    seq: u64,
    totals: QueueTotals,
}

impl State {
    fn write(&mut self, job: &Job, ttl: chrono::Duration) {
        self.records.insert(
            job.id,
            StoredJob {
                job: job.clone(),
                expires_at: Utc::now() + ttl,
            },
        );
    }

    /// Live record for `id`; drops it if expired.
    fn read(&mut self, id: JobId) -> Option<&Job> {
        let expired = self
            .records
            .get(&id)
            .map(|s| s.expires_at <= Utc::now())?;
        if expired {
            self.records.remove(&id);
            return None;
        }
        self.records.get(&id).map(|s| &s.job)
    }

    fn next_pending_score(&mut self, priority: i32) -> PendingScore {
        self.seq += 1;
        (Reverse(priority), self.seq)
    }

    fn unindex(&mut self, id: JobId) {
        self.pending.remove(id);
        self.processing.remove(id);
        self.completed.remove(id);
        self.failed.remove(id);
    }

    /// Check the lease against the stored record, evicting on expiry.
    fn check_lease(&mut self, lease: &Lease) -> Result<()> {
        let held = self.read(lease.job_id).map(|stored| stored.is_held_by(lease));
        match held {
            Some(true) => Ok(()),
            Some(false) => Err(MdusError::not_in_flight(lease.job_id)),
            None => {
                self.unindex(lease.job_id);
                Err(MdusError::job_not_found(lease.job_id))
            }
        }
    }
}

/// In-memory queue backend.
pub struct InMemoryQueueBackend {
    state: Mutex<State>,
    ttl: chrono::Duration,
}

impl InMemoryQueueBackend {
    /// Backend with the default 24h record expiry.
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(24 * 3600))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(1)),
        }
    }
}

impl Default for InMemoryQueueBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn score_of(at: Option<DateTime<Utc>>) -> i64 {
    at.unwrap_or_else(Utc::now).timestamp_millis()
}

#[async_trait]
impl QueueBackend for InMemoryQueueBackend {
    async fn put(&self, job: &Job) -> Result<()> {
        self.state.lock().write(job, self.ttl);
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.state.lock().read(id).cloned())
    }

    async fn delete(&self, id: JobId) -> Result<()> {
        self.state.lock().records.remove(&id);
        Ok(())
    }

    async fn enqueue(&self, job: &Job) -> Result<()> {
        let mut state = self.state.lock();
        let score = state.next_pending_score(job.priority);
        state.write(job, self.ttl);
        state.pending.insert(job.id, score);
        state.totals.queued += 1;
        Ok(())
    }

    async fn dequeue(&self, now: DateTime<Utc>) -> Result<Option<Job>> {
        let mut state = self.state.lock();
        while let Some(id) = state.pending.pop_first() {
            let mut job = match state.read(id) {
                Some(job) => job.clone(),
                None => {
                    tracing::warn!(job_id = %id, "Dropped pending entry with no record");
                    continue;
                }
            };
            job.mark_processing(now)?;
            state.write(&job, self.ttl);
            state.processing.insert(id, now.timestamp_millis());
            return Ok(Some(job));
        }
        Ok(None)
    }

    async fn acknowledge_complete(&self, lease: &Lease, job: &Job) -> Result<()> {
        let mut state = self.state.lock();
        state.check_lease(lease)?;
        state.processing.remove(job.id);
        state.completed.insert(job.id, score_of(job.completed_at));
        state.write(job, self.ttl);
        state.totals.completed += 1;
        Ok(())
    }

    async fn acknowledge_failed(&self, lease: &Lease, job: &Job) -> Result<()> {
        let mut state = self.state.lock();
        state.check_lease(lease)?;
        state.processing.remove(job.id);
        state.failed.insert(job.id, score_of(job.completed_at));
        state.write(job, self.ttl);
        state.totals.failed += 1;
        Ok(())
    }

    async fn requeue(&self, lease: &Lease, job: &Job) -> Result<()> {
        let mut state = self.state.lock();
        state.check_lease(lease)?;
        state.processing.remove(job.id);
        let score = state.next_pending_score(job.priority);
        state.pending.insert(job.id, score);
        state.write(job, self.ttl);
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let state = self.state.lock();
        Ok(QueueStats {
            pending: state.pending.len(),
            processing: state.processing.len(),
            completed: state.completed.len(),
            failed: state.failed.len(),
            totals: state.totals.clone(),
        })
    }

    async fn scan_stuck(&self, older_than: DateTime<Utc>) -> Result<Vec<JobId>> {
        let state = self.state.lock();
        Ok(state.processing.up_to(older_than.timestamp_millis()).collect())
    }

    async fn scan_stale(&self, older_than: DateTime<Utc>) -> Result<Vec<JobId>> {
        let state = self.state.lock();
        let cutoff = older_than.timestamp_millis();
        Ok(state
            .completed
            .up_to(cutoff)
            .chain(state.failed.up_to(cutoff))
            .collect())
    }

    async fn purge(&self, id: JobId) -> Result<bool> {
        let mut state = self.state.lock();
        if !state.completed.contains(id) && !state.failed.contains(id) {
            return Ok(false);
        }
        if let Some(job) = state.read(id) {
            if !job.status.is_terminal() {
                return Ok(false);
            }
        }
        state.completed.remove(id);
        state.failed.remove(id);
        state.records.remove(&id);
        Ok(true)
    }

    async fn evict(&self, id: JobId) -> Result<()> {
        self.state.lock().unindex(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::DocumentType;

    fn job(priority: i32) -> Job {
        Job::new(1, "doc.pdf", DocumentType::Other, priority, 3)
    }

    #[tokio::test]
    async fn test_dequeue_marks_processing() {
        let backend = InMemoryQueueBackend::new();
        let j = job(0);
        backend.enqueue(&j).await.unwrap();

        let now = Utc::now();
        let got = backend.dequeue(now).await.unwrap().unwrap();
        assert_eq!(got.id, j.id);
        assert_eq!(got.status, JobStatus::Processing);
        assert_eq!(got.started_at, Some(now));
        assert_eq!(got.attempt, 1);

        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.processing, 1);
    }

    #[tokio::test]
    async fn test_expired_pending_entry_is_skipped() {
        let backend = InMemoryQueueBackend::with_ttl(Duration::ZERO);
        backend.enqueue(&job(0)).await.unwrap();

        assert!(backend.dequeue(Utc::now()).await.unwrap().is_none());
        assert_eq!(backend.stats().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn test_ack_on_expired_record_evicts_index_entry() {
        let backend = InMemoryQueueBackend::new();
        let j = job(0);
        backend.enqueue(&j).await.unwrap();
        let mut got = backend.dequeue(Utc::now()).await.unwrap().unwrap();
        let lease = got.lease().unwrap();

        backend.delete(j.id).await.unwrap();
        got.mark_failed("x", Utc::now()).unwrap();
        assert!(backend.acknowledge_failed(&lease, &got).await.is_err());
        assert_eq!(backend.stats().await.unwrap().processing, 0);
    }

    #[tokio::test]
    async fn test_purge_ignores_non_terminal() {
        let backend = InMemoryQueueBackend::new();
        let j = job(0);
        backend.enqueue(&j).await.unwrap();
        assert!(!backend.purge(j.id).await.unwrap());
        assert!(backend.get(j.id).await.unwrap().is_some());
    }
}
