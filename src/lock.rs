//! Per-job exclusive access.
//!
//! The wire protocol cannot interleave two uploads, or an upload and a flush,
//! so every operation on a job runs under that job's [`FairMutex`]. Unlocking
//! hands the lock to the longest waiter, which keeps a periodic flush from
//! being starved by a queue of long uploads.

use crate::error::{IngestError, Result};
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{FairMutex, Mutex, RawFairMutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Held for the duration of one job operation; releases the job when dropped.
pub type JobGuard = ArcMutexGuard<RawFairMutex, ()>;

/// One [`FairMutex`] per job id, created on first use.
#[derive(Debug)]
pub struct JobLocks {
    locks: Mutex<HashMap<String, Arc<FairMutex<()>>>>,
    timeout: Duration,
}

impl JobLocks {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Take exclusive access to `job_id`.
    ///
    /// A timeout too large to express as a deadline waits without one.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::JobInUse`] if another operation still holds the
    /// job when the timeout expires.
    pub fn lock(&self, job_id: &str) -> Result<JobGuard> {
        let lock = Arc::clone(self.locks.lock().entry(job_id.to_string()).or_default());
        lock.try_lock_arc_for(self.timeout)
            .ok_or_else(|| IngestError::JobInUse {
                job_id: job_id.to_string(),
                message: format!(
                    "another operation did not finish within {} s",
                    self.timeout.as_secs()
                ),
            })
    }

    /// Forget the lock of a job that no operation is using.
    pub fn remove_idle(&self, job_id: &str) {
        let mut locks = self.locks.lock();
        if let Some(lock) = locks.get(job_id)
            && Arc::strong_count(lock) == 1
            && !lock.is_locked()
        {
            locks.remove(job_id);
        }
    }

    /// Whether a lock entry exists for `job_id`.
    #[must_use]
    pub fn contains(&self, job_id: &str) -> bool {
        self.locks.lock().contains_key(job_id)
    }
}
