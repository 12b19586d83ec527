//! Expired-grant cleanup.
//!
//! Purely housekeeping: queries already hide expired grants, so a sweep that fails or
//! never runs only costs space. The sweep walks the expiry queue rather than every grant.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::cancel::{CancelFlag, Cancellation};
use crate::error::GrantError;
use crate::store::core::QueueOutcome;
use crate::store::{GrantStore, KvBackend};

/// Outcome of one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired grants deleted.
    pub removed: usize,
    /// Queue entries dropped without deleting a grant (re-granted or revoked).
    pub stale: usize,
    /// Entries kept because their grant expires later within the same microsecond.
    pub deferred: usize,
}

/// Deletes up to `sweep_batch_limit` grants that are expired as of `now`.
pub fn sweep_expired<B: KvBackend>(
    store: &GrantStore<B>,
    now: DateTime<Utc>,
    cancel: &dyn Cancellation,
) -> Result<SweepReport, GrantError> {
    let limit = store.config().sweep_batch_limit as usize;
    let due = store.due_expirations(&now, limit)?;
    let mut report = SweepReport::default();
    for (queue_key, key) in due {
        cancel.check()?;
        match store.remove_if_expired(queue_key, &key, &now)? {
            QueueOutcome::Removed => report.removed += 1,
            QueueOutcome::Stale => report.stale += 1,
            QueueOutcome::NotDue => report.deferred += 1,
        }
    }
    if report.removed > 0 || report.stale > 0 {
        info!(removed = report.removed, stale = report.stale, "swept expired grants");
    }
    Ok(report)
}

/// Background thread running [`sweep_expired`] every `sweep_interval_secs`.
///
/// Failures are logged and the next cycle tries again. Dropping the handle stops the thread.
#[derive(Debug)]
pub struct Sweeper {
    stop: CancelFlag,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Starts the thread. Fails only if the OS refuses to spawn it.
    pub fn spawn<B: KvBackend + 'static>(store: Arc<GrantStore<B>>) -> io::Result<Self> {
        let stop = CancelFlag::new();
        let flag = stop.clone();
        let handle = thread::Builder::new()
            .name("grant-sweeper".into())
            .spawn(move || run(store, flag))?;
        Ok(Sweeper { stop, handle: Some(handle) })
    }

    /// Stops the thread and waits for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                warn!("grant sweeper thread panicked");
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<B: KvBackend>(store: Arc<GrantStore<B>>, stop: CancelFlag) {
    let interval = store.config().sweep_interval();
    debug!(?interval, "grant sweeper started");
    while !stop.is_cancelled() {
        match sweep_expired(&store, Utc::now(), &stop) {
            Ok(_) | Err(GrantError::Cancelled) => {}
            Err(e) => warn!(error = %e, "grant sweep failed; retrying next cycle"),
        }
        let deadline = Instant::now() + interval;
        while !stop.is_cancelled() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::park_timeout(deadline - now);
        }
    }
    debug!("grant sweeper stopped");
}
