use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use uuid::Uuid;

use crate::error::{ConvoyError, Result};

/// Bookkeeping record for a job the pipeline is currently running
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub tag: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// In-memory registry of running jobs.
///
/// Jobs register when pushed and deregister when their orchestration task
/// finishes. Adding an already-present id fails with
/// [`ConvoyError::DuplicateId`]; the pipeline retries with a fresh one. A
/// closed repository rejects further additions but keeps serving lookups.
pub struct JobRepository {
    items: DashMap<Uuid, JobRecord>,
    closed: AtomicBool,
}

impl JobRepository {
    pub fn new() -> Self {
        Self {
            items: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a job. Fails on id collisions and after close.
    pub fn add(&self, job_id: Uuid, tag: Option<String>) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ConvoyError::RepositoryClosed);
        }
        match self.items.entry(job_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(ConvoyError::DuplicateId { job_id })
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(JobRecord {
                    job_id,
                    tag,
                    created_at: Utc::now(),
                });
                debug!("Repository registered job {}", job_id);
                Ok(())
            }
        }
    }

    /// Drop a job record, returning it if it was present
    pub fn remove(&self, job_id: Uuid) -> Option<JobRecord> {
        self.items.remove(&job_id).map(|(_, record)| record)
    }

    /// Snapshot of every registered job
    pub fn items(&self) -> Vec<JobRecord> {
        self.items.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Number of registered jobs
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether no jobs are registered
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop every record
    pub fn clear(&self) {
        self.items.clear();
    }

    /// Refuse any further additions
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        debug!("Repository closed");
    }

    /// Whether the repository refuses additions
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for JobRepository {
    fn default() -> Self {
        Self::new()
    }
}
