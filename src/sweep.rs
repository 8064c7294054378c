//! Age-based maintenance sweep of the working directories
//!
//! Files whose modification time is more than `max_age` in the past are
//! deleted. Files belonging to jobs still in flight are never touched, even
//! when a slow request outlives the threshold.

use crate::error::{Result, ServiceError};
use crate::storage::{JobToken, StoragePaths};
use crate::tracing_config::spans;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, info, Instrument};

/// Registry of jobs between token generation and response completion
#[derive(Debug, Clone, Default)]
pub struct ActiveJobs {
    tokens: Arc<Mutex<HashSet<JobToken>>>,
}

impl ActiveJobs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tokens(&self) -> MutexGuard<'_, HashSet<JobToken>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `token` in flight until the returned guard is dropped
    #[must_use]
    pub fn register(&self, token: JobToken) -> JobGuard {
        self.tokens().insert(token);
        JobGuard {
            jobs: self.clone(),
            token,
        }
    }

    #[must_use]
    pub fn contains(&self, token: JobToken) -> bool {
        self.tokens().contains(&token)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keeps a job registered in [`ActiveJobs`] while alive
#[derive(Debug)]
pub struct JobGuard {
    jobs: ActiveJobs,
    token: JobToken,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.jobs.tokens().remove(&self.token);
    }
}

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Files deleted
    pub removed: usize,
    /// Regular files examined
    pub scanned: usize,
    /// Expired files kept because their job is still in flight
    pub skipped_active: usize,
}

/// Delete expired regular files from `dirs`
///
/// A file is expired when `now - mtime > max_age`. Files modified in the
/// future count as fresh. Entries that disappear while the sweep runs are
/// ignored.
///
/// # Errors
/// - A directory cannot be listed
/// - An expired file cannot be deleted
pub fn sweep_directories(
    dirs: &[&Path],
    max_age: Duration,
    now: SystemTime,
    active: &ActiveJobs,
) -> Result<SweepReport> {
    let mut report = SweepReport::default();

    for dir in dirs {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| ServiceError::file_io_error("list directory", dir, &e))?;

        for entry in entries {
            let entry = entry.map_err(|e| ServiceError::file_io_error("list directory", dir, &e))?;
            let path = entry.path();

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(ServiceError::file_io_error("stat", &path, &e)),
            };
            if !metadata.is_file() {
                continue;
            }
            report.scanned += 1;

            let modified = metadata
                .modified()
                .map_err(|e| ServiceError::file_io_error("read mtime of", &path, &e))?;
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age <= max_age {
                continue;
            }

            let in_flight = entry
                .file_name()
                .to_str()
                .and_then(JobToken::from_file_name)
                .is_some_and(|token| active.contains(token));
            if in_flight {
                debug!(path = %path.display(), "Skipping file of in-flight job");
                report.skipped_active += 1;
                continue;
            }

            match std::fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), age_secs = age.as_secs(), "Removed expired file");
                    report.removed += 1;
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => return Err(ServiceError::file_io_error("remove", &path, &e)),
            }
        }
    }

    Ok(report)
}

/// Run one sweep over both working directories on the blocking pool
///
/// # Errors
/// - Any error from [`sweep_directories`]
/// - The blocking task panicked
pub async fn run_sweep(
    paths: StoragePaths,
    max_age: Duration,
    active: ActiveJobs,
) -> Result<SweepReport> {
    let span = spans::sweep(max_age.as_secs());
    let report = tokio::task::spawn_blocking(move || {
        sweep_directories(&paths.dirs(), max_age, SystemTime::now(), &active)
    })
    .instrument(span.clone())
    .await
    .map_err(|e| ServiceError::Io(std::io::Error::other(format!("sweep task failed: {e}"))))??;

    span.in_scope(|| {
        info!(
            removed = report.removed,
            scanned = report.scanned,
            skipped_active = report.skipped_active,
            "Sweep finished"
        );
    });
    Ok(report)
}

/// Run the sweep every `interval` until the task is aborted
///
/// Failures are logged and the loop keeps going.
#[must_use]
pub fn spawn_periodic_sweep(
    paths: StoragePaths,
    interval: Duration,
    max_age: Duration,
    active: ActiveJobs,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; start one interval after boot
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = run_sweep(paths.clone(), max_age, active.clone()).await {
                tracing::warn!(error = %e, "Periodic sweep failed");
            }
        }
    })
}
