//! Cooperative cancellation for in-flight queries and sweeps.
//!
//! Scans check the signal between steps and stop with [`GrantError::Cancelled`] rather
//! than returning a partial result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::error::GrantError;

/// An external signal that asks a running operation to stop.
pub trait Cancellation: Send + Sync {
    /// Non-blocking cancellation check.
    fn is_cancelled(&self) -> bool;

    /// Turns a fired signal into an error for `?` propagation.
    fn check(&self) -> Result<(), GrantError> {
        if self.is_cancelled() {
            Err(GrantError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Signal that never fires.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverCancel;

impl Cancellation for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Shared flag flipped by [`CancelFlag::cancel`]. Clones observe the same flag.
#[derive(Debug, Default, Clone)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }
}

impl Cancellation for CancelFlag {
    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Fires once the wall clock passes a fixed instant. A deadline too far out to represent
/// never fires.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn at(instant: Instant) -> Self {
        Deadline(Some(instant))
    }

    pub fn after(timeout: std::time::Duration) -> Self {
        Deadline(Instant::now().checked_add(timeout))
    }
}

impl Cancellation for Deadline {
    fn is_cancelled(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let observer = flag.clone();
        assert!(observer.check().is_ok());
        flag.cancel();
        assert!(matches!(observer.check(), Err(GrantError::Cancelled)));
    }

    #[test]
    fn test_deadline() {
        assert!(Deadline::at(Instant::now()).is_cancelled());
        assert!(!Deadline::after(Duration::from_secs(3600)).is_cancelled());
        assert!(!NeverCancel.is_cancelled());
    }

    #[test]
    fn test_unrepresentable_deadline_never_fires() {
        let deadline = Deadline::after(Duration::MAX);
        assert!(!deadline.is_cancelled());
        assert!(deadline.check().is_ok());
    }
}
