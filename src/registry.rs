//! Active jobs and the bounded record of finished ones.
//!
//! Both tables sit behind one lock so a completing job moves from the active
//! table to the finished table in a single step.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::error::Wf2RoError;
use crate::job::{Job, JobRequest, JobState, JobStatus};

pub const DEFAULT_MAX_ACTIVE: usize = 100;
pub const DEFAULT_MAX_FINISHED: usize = 100_000;
pub const DEFAULT_FINISHED_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryLimits {
    pub max_active: usize,
    pub max_finished: usize,
    pub finished_ttl: Duration,
}

impl Default for RegistryLimits {
    fn default() -> Self {
        Self {
            max_active: DEFAULT_MAX_ACTIVE,
            max_finished: DEFAULT_MAX_FINISHED,
            finished_ttl: DEFAULT_FINISHED_TTL,
        }
    }
}

/// Finished job snapshots, evicted oldest first once over capacity or older
/// than the expiration period.
#[derive(Debug)]
pub struct FinishedJobs {
    capacity: usize,
    ttl: chrono::Duration,
    snapshots: HashMap<Uuid, JobStatus>,
    order: VecDeque<(Uuid, DateTime<Utc>)>,
}

impl FinishedJobs {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::weeks(5200)),
            snapshots: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn insert(&mut self, status: JobStatus) {
        if self.capacity == 0 {
            return;
        }
        let id = status.id;
        let finished = status.finished.unwrap_or_else(Utc::now);
        if self.snapshots.insert(id, status).is_some() {
            self.order.retain(|(queued, _)| *queued != id);
        }
        self.order.push_back((id, finished));
        while self.snapshots.len() > self.capacity {
            self.evict_oldest();
        }
    }

    fn evict_oldest(&mut self) {
        if let Some((id, _)) = self.order.pop_front() {
            self.snapshots.remove(&id);
        }
    }

    /// Drops snapshots that finished more than the expiration period before `now`.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        while let Some((id, finished)) = self.order.front().copied() {
            if now.signed_duration_since(finished) <= self.ttl {
                break;
            }
            debug!(job = %id, "finished job expired");
            self.order.pop_front();
            self.snapshots.remove(&id);
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<&JobStatus> {
        self.snapshots.get(id)
    }

    pub fn remove(&mut self, id: &Uuid) -> Option<JobStatus> {
        let removed = self.snapshots.remove(id)?;
        self.order.retain(|(queued, _)| queued != id);
        Some(removed)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.snapshots.contains_key(id)
    }
}

#[derive(Debug)]
struct Tables {
    active: HashMap<Uuid, Arc<Job>>,
    finished: FinishedJobs,
}

#[derive(Debug)]
pub struct JobRegistry {
    limits: RegistryLimits,
    tables: Mutex<Tables>,
}

impl JobRegistry {
    pub fn new(limits: RegistryLimits) -> Self {
        Self {
            limits,
            tables: Mutex::new(Tables {
                active: HashMap::new(),
                finished: FinishedJobs::new(limits.max_finished, limits.finished_ttl),
            }),
        }
    }

    pub fn limits(&self) -> RegistryLimits {
        self.limits
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        let mut tables = self
            .tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tables.finished.prune(Utc::now());
        tables
    }

    /// Registers a new job, refusing it when the active table is full.
    pub fn admit(&self, request: JobRequest) -> Result<Arc<Job>, Wf2RoError> {
        let mut tables = self.tables();
        if tables.active.len() >= self.limits.max_active {
            return Err(Wf2RoError::ServiceBusy {
                limit: self.limits.max_active,
            });
        }
        let job = Arc::new(Job::new(request));
        tables.active.insert(job.id(), Arc::clone(&job));
        Ok(job)
    }

    /// Moves a job's final snapshot into the finished table.
    pub fn complete(&self, id: Uuid) {
        let mut tables = self.tables();
        if let Some(job) = tables.active.remove(&id) {
            tables.finished.insert(job.status());
        }
    }

    /// Forgets a job that never started.
    pub fn withdraw(&self, id: Uuid) {
        self.tables().active.remove(&id);
    }

    pub fn status(&self, id: Uuid) -> Result<JobStatus, Wf2RoError> {
        let tables = self.tables();
        let status = match tables.active.get(&id) {
            Some(job) => job.status(),
            None => tables
                .finished
                .get(&id)
                .cloned()
                .ok_or(Wf2RoError::JobNotFound(id))?,
        };
        if status.status == JobState::Cancelled {
            return Err(Wf2RoError::JobCancelled(id));
        }
        Ok(status)
    }

    /// Cancels an active job or discards a finished job's record.
    pub fn cancel_or_discard(&self, id: Uuid) -> Result<(), Wf2RoError> {
        let mut tables = self.tables();
        if let Some(job) = tables.active.get(&id) {
            if job.state() == JobState::Cancelled {
                return Err(Wf2RoError::JobCancelled(id));
            }
            if !job.cancel() {
                // Settled but not yet completed: drop it so `complete` finds nothing to record.
                tables.active.remove(&id);
                debug!(job = %id, "settled job discarded");
            }
            return Ok(());
        }
        match tables.finished.get(&id).map(|status| status.status) {
            Some(JobState::Cancelled) => Err(Wf2RoError::JobCancelled(id)),
            Some(_) => {
                tables.finished.remove(&id);
                debug!(job = %id, "finished job discarded");
                Ok(())
            }
            None => Err(Wf2RoError::JobNotFound(id)),
        }
    }

    pub fn active_count(&self) -> usize {
        self.tables().active.len()
    }

    pub fn finished_count(&self) -> usize {
        self.tables().finished.len()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(RegistryLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;
    use crate::job::ExtractFolders;

    fn status(finished: DateTime<Utc>) -> JobStatus {
        JobStatus {
            id: Uuid::new_v4(),
            resource: Url::parse("http://example.com/wf.wfbundle").unwrap(),
            format: "application/json".to_string(),
            ro: Url::parse("http://example.com/ROs/ro/").unwrap(),
            status: JobState::Done,
            reason: None,
            added: Vec::new(),
            warnings: Vec::new(),
            extract: ExtractFolders::default(),
            created: finished,
            finished: Some(finished),
        }
    }

    #[test]
    fn expired_snapshots_are_pruned() {
        let now = Utc::now();
        let mut finished = FinishedJobs::new(10, Duration::from_secs(600));
        let old = status(now - chrono::Duration::seconds(601));
        let fresh = status(now - chrono::Duration::seconds(5));
        let (old_id, fresh_id) = (old.id, fresh.id);
        finished.insert(old);
        finished.insert(fresh);

        finished.prune(now);
        assert!(!finished.contains(&old_id));
        assert!(finished.contains(&fresh_id));
    }

    #[test]
    fn removal_keeps_order_consistent() {
        let now = Utc::now();
        let mut finished = FinishedJobs::new(2, Duration::from_secs(600));
        let first = status(now);
        let first_id = first.id;
        finished.insert(first);
        assert!(finished.remove(&first_id).is_some());
        finished.insert(status(now));
        finished.insert(status(now));
        assert_eq!(finished.len(), 2);
        assert_eq!(finished.order.len(), 2);
    }
}
