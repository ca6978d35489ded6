//! Registry of commands running in the background and not yet waited for.
//!
//! The registry keeps its jobs alive: a background command whose handle is
//! dropped stays listed here until [`wait_jobs`] reaps it. A job that is never
//! waited for keeps running after the host stops tracking it.

use crate::engine::Job;
use crate::error::Result;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::Arc;

static JOBS: Lazy<Mutex<Vec<Arc<Job>>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Diagnostic snapshot of a registered job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub id: u64,
    /// Shell-quoted command line of the rightmost stage.
    pub command: String,
    /// `None` once the process has exited but nobody has collected it yet.
    pub pid: Option<u32>,
}

pub(crate) fn register(job: Arc<Job>) {
    tracing::debug!(id = job.id(), command = %job.label(), "job registered");
    JOBS.lock().push(job);
}

pub(crate) fn forget(id: u64) {
    let mut jobs = JOBS.lock();
    let before = jobs.len();
    jobs.retain(|job| job.id() != id);
    if jobs.len() != before {
        tracing::debug!(id, "job removed");
    }
}

/// Every background job not yet waited for, oldest first.
pub fn jobs() -> Vec<JobInfo> {
    JOBS.lock()
        .iter()
        .map(|job| JobInfo {
            id: job.id(),
            command: job.label().to_owned(),
            pid: job.pid().ok().flatten(),
        })
        .collect()
}

/// Wait for every registered job.
///
/// Blocks for as long as the slowest job runs, forever if one never exits.
/// All jobs are waited for even when some fail; the first failure is returned.
pub fn wait_jobs() -> Result<()> {
    let pending: Vec<Arc<Job>> = JOBS.lock().clone();
    let mut first_error = None;
    for job in pending {
        if let Err(err) = job.wait() {
            tracing::debug!(id = job.id(), error = %err, "background job failed");
            if first_error.is_none() {
                first_error = Some(err);
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;

    fn registered(id: u64) -> bool {
        jobs().iter().any(|info| info.id == id)
    }

    #[test]
    fn background_jobs_are_listed_until_waited() {
        let job = Command::new("sleep").arg("0.1").delay().unwrap();
        let id = job.job_id();
        let info = jobs().into_iter().find(|info| info.id == id).unwrap();
        assert_eq!(info.command, "sleep 0.1");
        assert!(info.pid.is_some());

        job.wait().unwrap();
        assert!(!registered(id));
    }

    #[test]
    fn dropped_handles_are_still_reaped() {
        let id = {
            let job = Command::new("true").delay().unwrap();
            job.job_id()
        };
        assert!(registered(id));
        wait_jobs().unwrap();
        assert!(!registered(id));
    }
}
