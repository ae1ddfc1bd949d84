//! Readiness polling for asynchronous remote state transitions.

use crate::error::{Error, Result};
use crate::retry::RetryExecutor;
use crate::types::WaitConfig;
use std::thread;

/// What a single status poll observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Terminal ready condition reached
    Ready,
    /// Not ready yet (including "not yet visible"); keep polling
    Pending(String),
    /// Terminal condition that will never become ready
    Failed(String),
}

/// Callback trait for polling progress.
pub trait WaitCallback {
    /// Called after each poll that did not reach a terminal condition.
    fn on_pending(&self, what: &str, attempt: u32, max_attempts: u32, detail: &str);
}

impl WaitCallback for crate::retry::NoCallback {
    fn on_pending(&self, _: &str, _: u32, _: u32, _: &str) {}
}

impl WaitCallback for crate::retry::LogCallback {
    fn on_pending(&self, what: &str, attempt: u32, max_attempts: u32, detail: &str) {
        log::debug!("waiting for {what} [{detail}] ({attempt}/{max_attempts})");
    }
}

/// Poll `status` until it reports [`Readiness::Ready`].
///
/// Every poll runs through `retry`, so transient failures of the status
/// accessor are absorbed there. The loop never succeeds by running out of
/// attempts: exhausting `config.max_attempts` returns
/// [`Error::WaitTimeout`], and a [`Readiness::Failed`] poll returns
/// [`Error::NotReady`].
pub fn wait_until_ready<F>(
    config: &WaitConfig,
    retry: &RetryExecutor<'_>,
    callback: Option<&dyn WaitCallback>,
    what: &str,
    mut status: F,
) -> Result<()>
where
    F: FnMut() -> Result<Readiness>,
{
    let operation = format!("poll status of {what}");

    for attempt in 1..=config.max_attempts {
        match retry.execute(&operation, &mut status)? {
            Readiness::Ready => {
                log::debug!("{what} is available after {attempt} polls");
                return Ok(());
            }
            Readiness::Failed(detail) => {
                return Err(Error::NotReady {
                    what: what.to_string(),
                    detail,
                });
            }
            Readiness::Pending(detail) => {
                if let Some(cb) = callback {
                    cb.on_pending(what, attempt, config.max_attempts, &detail);
                }
            }
        }

        if attempt < config.max_attempts && !config.interval.is_zero() {
            thread::sleep(config.interval);
        }
    }

    Err(Error::WaitTimeout {
        what: what.to_string(),
        attempts: config.max_attempts,
    })
}
