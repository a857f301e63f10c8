use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use super::queue::Job;
use crate::common::FINISHED_JOBS_RETAINED;
use crate::utils::now_millis;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

/// What `GET /jobs/<id>` reports. Timestamps are unix milliseconds.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub bucket: String,
    pub key: String,
    pub file_type: String,
    pub status: JobStatus,
    pub submitted_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub uploaded: usize,
    pub error: Option<String>,
    #[serde(skip)]
    finish_order: u64,
}

/// In-memory job status table, shared by the handlers and the worker.
///
/// Queued and running jobs are always kept. Only the most recent `retained`
/// finished jobs are; older ones are evicted as new jobs finish.
#[derive(Debug)]
pub struct JobRegistry {
    records: DashMap<Uuid, JobRecord>,
    retained: usize,
    finished: AtomicU64,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_retention(FINISHED_JOBS_RETAINED)
    }
}

impl JobRegistry {
    pub fn with_retention(retained: usize) -> Self {
        Self {
            records: DashMap::new(),
            retained,
            finished: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn insert_queued(&self, job: &Job) {
        self.records.insert(
            job.id,
            JobRecord {
                job_id: job.id,
                bucket: job.bucket.clone(),
                key: job.key.clone(),
                file_type: job.file_type.clone(),
                status: JobStatus::Queued,
                submitted_at: now_millis(),
                started_at: None,
                finished_at: None,
                uploaded: 0,
                error: None,
                finish_order: 0,
            },
        );
    }

    /// Drops the record of a job that never made it into the queue.
    pub fn remove(&self, id: &Uuid) {
        self.records.remove(id);
    }

    pub fn mark_running(&self, id: &Uuid) {
        if let Some(mut record) = self.records.get_mut(id) {
            record.status = JobStatus::Running;
            record.started_at = Some(now_millis());
        }
    }

    pub fn mark_succeeded(&self, id: &Uuid, uploaded: usize) {
        if let Some(mut record) = self.records.get_mut(id) {
            record.status = JobStatus::Succeeded;
            record.finished_at = Some(now_millis());
            record.finish_order = self.finished.fetch_add(1, Ordering::SeqCst);
            record.uploaded = uploaded;
        }
        self.evict_finished();
    }

    pub fn mark_failed(&self, id: &Uuid, uploaded: usize, reason: impl Into<String>) {
        if let Some(mut record) = self.records.get_mut(id) {
            record.status = JobStatus::Failed;
            record.finished_at = Some(now_millis());
            record.finish_order = self.finished.fetch_add(1, Ordering::SeqCst);
            record.uploaded = uploaded;
            record.error = Some(reason.into());
        }
        self.evict_finished();
    }

    // Must not be called while a shard guard of `records` is held.
    fn evict_finished(&self) {
        let mut finished: Vec<(u64, Uuid)> = self
            .records
            .iter()
            .filter(|record| matches!(record.status, JobStatus::Succeeded | JobStatus::Failed))
            .map(|record| (record.finish_order, record.job_id))
            .collect();
        if finished.len() <= self.retained {
            return;
        }
        finished.sort_unstable();
        let excess = finished.len() - self.retained;
        for (_, id) in finished.into_iter().take(excess) {
            self.records.remove(&id);
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<JobRecord> {
        self.records.get(id).map(|record| record.clone())
    }
}
