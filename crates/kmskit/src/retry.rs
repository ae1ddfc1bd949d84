//! Bounded retry with exponential backoff and jitter.
//!
//! Errors are classified before every retry: user errors and fatal errors
//! are re-raised at once, transient errors consume the attempt budget, and
//! rate-limit signals extend the budget by one so throttling never exhausts
//! the same allowance as genuine failures.

use crate::error::{Error, ErrorClass, Result};
use crate::types::RetryConfig;
use std::thread;
use std::time::Duration;

/// Callback trait for retry progress notifications.
///
/// Callbacks are for observability only; they cannot influence whether or
/// when an operation is retried.
pub trait RetryCallback {
    /// Called once before each retry.
    ///
    /// # Arguments
    /// * `operation` - Name of the operation being retried
    /// * `attempt` - The attempt that just failed (1-indexed)
    /// * `ceiling` - Current attempt ceiling (grows under rate limiting)
    /// * `error` - The error that triggered the retry
    /// * `delay` - Time until the next attempt
    fn on_retry(&self, operation: &str, attempt: u32, ceiling: u32, error: &Error, delay: Duration);
}

/// No-op callback that does nothing.
pub struct NoCallback;

impl RetryCallback for NoCallback {
    fn on_retry(&self, _: &str, _: u32, _: u32, _: &Error, _: Duration) {}
}

/// Callback that reports retries through the `log` facade.
pub struct LogCallback;

impl RetryCallback for LogCallback {
    fn on_retry(&self, operation: &str, attempt: u32, ceiling: u32, error: &Error, delay: Duration) {
        log::warn!(
            "{operation}: got (possibly transient) error code '{}' on attempt {attempt}/{ceiling}, retrying in {:.1}s",
            error.code().unwrap_or("transport"),
            delay.as_secs_f64()
        );
    }
}

/// Runs remote operations under a bounded-retry policy.
pub struct RetryExecutor<'a> {
    config: &'a RetryConfig,
    callback: Option<&'a dyn RetryCallback>,
}

impl<'a> RetryExecutor<'a> {
    /// Create an executor from a config and an optional callback.
    pub fn new(config: &'a RetryConfig, callback: Option<&'a dyn RetryCallback>) -> Self {
        Self { config, callback }
    }

    /// Execute an operation, retrying any transient or rate-limited error.
    pub fn execute<T, F>(&self, operation: &str, f: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        self.execute_allowing(operation, &[], f)
    }

    /// Execute an operation, retrying transient errors only when their code
    /// is in `allowed_codes` (an empty slice allows every transient code).
    ///
    /// Rate-limit signals are always retried and extend the ceiling by one.
    /// When the ceiling is reached the last error is returned wrapped in
    /// [`Error::RetriesExhausted`].
    pub fn execute_allowing<T, F>(&self, operation: &str, allowed_codes: &[&str], mut f: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut ceiling = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let error = match f() {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            match error.class() {
                ErrorClass::UserError | ErrorClass::Fatal => return Err(error),
                ErrorClass::Transient => {
                    if !allowed_codes.is_empty()
                        && !error.code().is_some_and(|code| allowed_codes.contains(&code))
                    {
                        return Err(error);
                    }
                }
                ErrorClass::RateLimited => ceiling += 1,
            }

            if attempt >= ceiling {
                return Err(Error::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    source: Box::new(error),
                });
            }

            let delay = self.config.next_delay(attempt);

            if let Some(cb) = self.callback {
                cb.on_retry(operation, attempt, ceiling, &error, delay);
            }

            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }
    }
}

/// Execute an operation with retry logic.
///
/// # Arguments
/// * `config` - Retry configuration
/// * `callback` - Optional callback for retry notifications
/// * `operation` - Name used in retry notifications and exhaustion errors
/// * `f` - The operation to execute
pub fn with_retry<T, F>(
    config: &RetryConfig,
    callback: Option<&dyn RetryCallback>,
    operation: &str,
    f: F,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    RetryExecutor::new(config, callback).execute(operation, f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;
    use std::cell::Cell;
    use std::rc::Rc;

    fn internal() -> Error {
        Error::remote(codes::KMS_INTERNAL, "internal failure")
    }

    fn throttled() -> Error {
        Error::remote(codes::REQUEST_LIMIT_EXCEEDED, "slow down")
    }

    #[test]
    fn test_success_first_try() {
        let config = RetryConfig::no_retry();
        let result = with_retry(&config, None, "op", || Ok::<_, Error>(42));
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_transient_failures_then_success() {
        let config = RetryConfig::immediate(7);

        for k in 0..7u32 {
            let attempts = Rc::new(Cell::new(0u32));
            let counter = attempts.clone();

            let result = with_retry(&config, None, "op", || {
                let current = counter.get();
                counter.set(current + 1);
                if current < k { Err(internal()) } else { Ok("done") }
            });

            assert_eq!(result.unwrap(), "done");
            assert_eq!(attempts.get(), k + 1);
        }
    }

    #[test]
    fn test_user_error_is_not_retried() {
        let config = RetryConfig::immediate(7);
        let attempts = Rc::new(Cell::new(0));
        let counter = attempts.clone();

        let result: Result<()> = with_retry(&config, None, "op", || {
            counter.set(counter.get() + 1);
            Err(Error::remote(codes::VALIDATION, "bad alias"))
        });

        assert!(result.unwrap_err().is_user_error());
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_fatal_error_is_not_retried() {
        let config = RetryConfig::immediate(7);
        let attempts = Rc::new(Cell::new(0));
        let counter = attempts.clone();

        let result: Result<()> = with_retry(&config, None, "op", || {
            counter.set(counter.get() + 1);
            Err(Error::remote("MysteryException", "?"))
        });

        assert!(matches!(result, Err(Error::Remote { .. })));
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_exhaustion_reports_operation_and_attempts() {
        let config = RetryConfig::immediate(7);
        let attempts = Rc::new(Cell::new(0));
        let counter = attempts.clone();

        let result: Result<()> = with_retry(&config, None, "create key", || {
            counter.set(counter.get() + 1);
            Err(internal())
        });

        let err = result.unwrap_err();
        assert_eq!(attempts.get(), 7);
        assert_eq!(err.class(), ErrorClass::Fatal);
        match err {
            Error::RetriesExhausted {
                operation,
                attempts,
                source,
            } => {
                assert_eq!(operation, "create key");
                assert_eq!(attempts, 7);
                assert_eq!(source.code(), Some(codes::KMS_INTERNAL));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rate_limit_extends_ceiling() {
        let config = RetryConfig::immediate(7);
        let attempts = Rc::new(Cell::new(0u32));
        let counter = attempts.clone();

        // Throttled on attempt 3, transient everywhere else until attempt 8.
        let result = with_retry(&config, None, "op", || {
            let current = counter.get() + 1;
            counter.set(current);
            match current {
                3 => Err(throttled()),
                8 => Ok(current),
                _ => Err(internal()),
            }
        });

        assert_eq!(result.unwrap(), 8);
        assert_eq!(attempts.get(), 8);
    }

    #[test]
    fn test_without_rate_limit_attempt_eight_is_never_reached() {
        let config = RetryConfig::immediate(7);
        let attempts = Rc::new(Cell::new(0u32));
        let counter = attempts.clone();

        let result = with_retry(&config, None, "op", || {
            let current = counter.get() + 1;
            counter.set(current);
            if current == 8 { Ok(current) } else { Err(internal()) }
        });

        assert!(matches!(result, Err(Error::RetriesExhausted { attempts: 7, .. })));
    }

    #[test]
    fn test_allowed_codes_filter_transient_errors() {
        let config = RetryConfig::immediate(7);
        let executor = RetryExecutor::new(&config, None);
        let attempts = Rc::new(Cell::new(0));
        let counter = attempts.clone();

        let result: Result<()> = executor.execute_allowing("op", &[codes::DEPENDENCY_TIMEOUT], || {
            counter.set(counter.get() + 1);
            Err(internal())
        });

        assert!(matches!(result, Err(Error::Remote { .. })));
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_allowed_codes_permit_listed_error() {
        let config = RetryConfig::immediate(7);
        let executor = RetryExecutor::new(&config, None);
        let attempts = Rc::new(Cell::new(0));
        let counter = attempts.clone();

        let result = executor.execute_allowing("op", &[codes::KMS_INTERNAL], || {
            let current = counter.get() + 1;
            counter.set(current);
            if current < 3 { Err(internal()) } else { Ok(()) }
        });

        assert!(result.is_ok());
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_callback_invoked_once_per_retry() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicU32, Ordering};

        struct CountingCallback(Arc<AtomicU32>);
        impl RetryCallback for CountingCallback {
            fn on_retry(&self, _: &str, _: u32, _: u32, _: &Error, _: Duration) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let config = RetryConfig::immediate(3);
        let callback_count = Arc::new(AtomicU32::new(0));
        let callback = CountingCallback(callback_count.clone());

        let _: Result<()> = with_retry(&config, Some(&callback), "op", || Err(internal()));

        // Not called after the final attempt
        assert_eq!(callback_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_callback_sees_extended_ceiling() {
        use std::cell::RefCell;

        struct Recorder(RefCell<Vec<(u32, u32)>>);
        impl RetryCallback for Recorder {
            fn on_retry(&self, _: &str, attempt: u32, ceiling: u32, _: &Error, _: Duration) {
                self.0.borrow_mut().push((attempt, ceiling));
            }
        }

        let config = RetryConfig::immediate(2);
        let recorder = Recorder(RefCell::new(Vec::new()));
        let attempts = Cell::new(0);

        let result = with_retry(&config, Some(&recorder), "op", || {
            attempts.set(attempts.get() + 1);
            if attempts.get() == 1 { Err(throttled()) } else { Ok(()) }
        });

        assert!(result.is_ok());
        assert_eq!(*recorder.0.borrow(), vec![(1, 3)]);
    }
}
