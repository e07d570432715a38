//! Requeue classification for pool manager results
//!
//! The pool manager never hides a retry request inside an error. Operations
//! that may ask to be retried return an [`Outcome`], and [`classify`] turns it
//! into either a value to continue with, a scheduled retry, or a fatal error
//! wrapped with what the reconciler was doing.

use std::time::Duration;

use kube::runtime::controller::Action;

use crate::Error;

/// Fixed backoff used when a dependency is not ready or reconciliation is paused
pub const REQUEUE_AFTER: Duration = Duration::from_secs(30);

/// Result of a pool manager operation that may ask to be retried
#[derive(Debug)]
pub enum Outcome<T> {
    /// The operation finished
    Ready(T),
    /// The operation could not finish yet; try again after the duration
    RetryAfter(Duration),
    /// The operation failed
    Fatal(Error),
}

/// Scheduling decision derived from an [`Outcome`]
#[derive(Debug, PartialEq, Eq)]
pub enum Classified<T> {
    /// Continue the pass with the value
    Proceed(T),
    /// Stop the pass and requeue after the duration
    Retry(Duration),
}

impl<T> Classified<T> {
    /// Scheduling action for a pass that ends here
    ///
    /// `Proceed` waits for the next change event; `Retry` requeues.
    pub fn into_action(self) -> Action {
        match self {
            Classified::Proceed(_) => Action::await_change(),
            Classified::Retry(after) => Action::requeue(after),
        }
    }
}

/// Classify a pool manager outcome
///
/// Explicit retries are not failures and carry no error. Fatal outcomes are
/// wrapped with `context` and returned as `Err` for the controller runtime to
/// back off on.
pub fn classify<T>(outcome: Outcome<T>, context: &str) -> Result<Classified<T>, Error> {
    match outcome {
        Outcome::Ready(v) => Ok(Classified::Proceed(v)),
        Outcome::RetryAfter(after) => Ok(Classified::Retry(after)),
        Outcome::Fatal(e) => Err(Error::manager(context, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_proceeds_with_value() {
        let c = classify(Outcome::Ready(3usize), "ctx").expect("not fatal");
        assert_eq!(c, Classified::Proceed(3));
        assert_eq!(c.into_action(), Action::await_change());
    }

    #[test]
    fn retry_after_keeps_manager_duration() {
        let c = classify::<usize>(Outcome::RetryAfter(Duration::from_secs(7)), "ctx")
            .expect("retry is not an error");
        assert_eq!(c, Classified::Retry(Duration::from_secs(7)));
        assert_eq!(c.into_action(), Action::requeue(Duration::from_secs(7)));
    }

    #[test]
    fn fatal_is_wrapped_with_context() {
        let err = classify::<usize>(
            Outcome::Fatal(Error::internal("boom")),
            "failed to create the missing data",
        )
        .expect_err("fatal must propagate");
        assert!(matches!(err, Error::Manager { ref context, .. } if context == "failed to create the missing data"));
        assert!(err.to_string().contains("boom"));
    }
}
