//! Cooperative cancellation with an optional wall-clock deadline.
//!
//! Long-running stages call [`CancelToken::check`] between units of work and
//! abandon everything computed so far when it trips.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{AnalysisError, Result};

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// A token that never trips on its own.
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that trips once `timeout` has elapsed from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Request cancellation. Visible to every clone of this token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::Relaxed) {
            return true;
        }
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }

    #[inline]
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(AnalysisError::NotReady)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(clone.check().is_ok());
        token.cancel();
        assert_eq!(clone.check(), Err(AnalysisError::NotReady));
    }

    #[test]
    fn zero_timeout_trips_immediately() {
        let token = CancelToken::with_timeout(Duration::ZERO);
        assert!(token.is_cancelled());
    }
}
