//! Caller-supplied cancellation and deadline carried into every operation.

use crate::error::{Error, Result};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Cancellation signal plus an optional deadline.
///
/// Cloning shares the same token. [`Context::child`] derives a context that is
/// cancelled with its parent but can also be cancelled on its own.
#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that never expires unless cancelled.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Keeps the earlier of the existing deadline and `deadline`.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self {
            token: self.token.clone(),
            deadline: Some(deadline),
        }
    }

    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fails with `Cancelled` or `DeadlineExceeded` once the context is done.
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Error::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_is_live() {
        assert!(Context::background().check().is_ok());
    }

    #[test]
    fn test_cancel_propagates_to_clones_and_children() {
        let ctx = Context::background();
        let clone = ctx.clone();
        let child = ctx.child();

        ctx.cancel();

        assert!(matches!(clone.check(), Err(Error::Cancelled)));
        assert!(matches!(child.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_child_cancel_leaves_parent() {
        let ctx = Context::background();
        let child = ctx.child();

        child.cancel();

        assert!(ctx.check().is_ok());
        assert!(child.check().is_err());
    }

    #[test]
    fn test_expired_deadline() {
        let ctx = Context::background().with_deadline(Instant::now() - Duration::from_millis(1));
        assert!(matches!(ctx.check(), Err(Error::DeadlineExceeded)));
    }

    #[test]
    fn test_earlier_deadline_wins() {
        let soon = Instant::now() + Duration::from_secs(1);
        let later = soon + Duration::from_secs(60);
        let ctx = Context::background().with_deadline(soon).with_deadline(later);

        assert_eq!(Some(soon), ctx.deadline());
    }
}
