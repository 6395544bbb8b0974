//! Job table
//!
//! Holds every job submitted to the coordinator. Records are replaced whole;
//! once a job reaches a terminal state its record never changes again.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::types::{now_millis, Job, JobId, JobStatus};

/// Concurrent map from job id to the latest job record
#[derive(Default)]
pub struct JobTable {
    jobs: DashMap<JobId, Job>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new pending job under a fresh id
    pub fn insert_new(&self, sql: &str) -> Job {
        loop {
            let id = JobId::generate();
            if let Entry::Vacant(slot) = self.jobs.entry(id.clone()) {
                let job = Job::new(id, sql, now_millis());
                slot.insert(job.clone());
                return job;
            }
        }
    }

    /// Get the current record of a job
    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.jobs.get(id).map(|job| job.value().clone())
    }

    /// All jobs, oldest first
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.iter().map(|entry| entry.value().clone()).collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    /// Replace a non-terminal job with `f(current)`
    ///
    /// Returns the new record, or `None` if the job is unknown or already
    /// finished. The check and the swap happen under the same shard lock.
    pub fn transition(&self, id: &JobId, f: impl FnOnce(&Job) -> Job) -> Option<Job> {
        let mut entry = self.jobs.get_mut(id)?;
        if entry.status.is_terminal() {
            return None;
        }
        let next = f(entry.value());
        *entry = next.clone();
        Some(next)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Number of jobs currently in `status`
    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|entry| entry.status == status).count()
    }

    /// Pending plus running jobs
    pub fn active_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|entry| !entry.status.is_terminal())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_insert_new_is_pending() {
        let table = JobTable::new();
        let job = table.insert_new("SELECT 1");

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.sql, "SELECT 1");
        assert_eq!(table.get(&job.id).unwrap().status, JobStatus::Pending);
        assert_eq!(table.active_count(), 1);
    }

    #[test]
    fn test_ids_unique() {
        let table = JobTable::new();
        let ids: HashSet<JobId> = (0..500).map(|_| table.insert_new("SELECT 1").id).collect();
        assert_eq!(ids.len(), 500);
        assert_eq!(table.len(), 500);
    }

    #[test]
    fn test_terminal_jobs_frozen() {
        let table = JobTable::new();
        let id = table.insert_new("SELECT 1").id;

        let running = table.transition(&id, |job| job.running(10)).unwrap();
        assert_eq!(running.status, JobStatus::Running);

        let cancelled = table.transition(&id, |job| job.cancelled(20)).unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);

        assert!(table.transition(&id, |job| job.failed("late", 30)).is_none());
        let job = table.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.completed_at, Some(20));
    }

    #[test]
    fn test_unknown_job() {
        let table = JobTable::new();
        assert!(table.get(&JobId::from("nope")).is_none());
        assert!(table.transition(&JobId::from("nope"), |job| job.running(0)).is_none());
    }

    #[test]
    fn test_counts() {
        let table = JobTable::new();
        let a = table.insert_new("SELECT 1").id;
        let b = table.insert_new("SELECT 2").id;
        table.insert_new("SELECT 3");

        table.transition(&a, |job| job.failed("boom", 1));
        table.transition(&b, |job| job.running(1));

        assert_eq!(table.count(JobStatus::Failed), 1);
        assert_eq!(table.count(JobStatus::Running), 1);
        assert_eq!(table.active_count(), 2);
        assert_eq!(table.list().len(), 3);
    }
}
