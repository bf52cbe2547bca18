//! Failure classification and retry bookkeeping for one logical call.

use std::collections::HashSet;
use std::net::SocketAddr;

use hotrod_core::HotRodError;
use tracing::warn;

/// What to do after a failed attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-route and try again.
    Retry,
    /// Give up; the last recorded error is the call's outcome.
    Fail,
}

/// Per-call retry state.
///
/// Lives for one logical operation and dies with it: the failed-server set
/// never leaks into other calls, so a server that failed once is excluded
/// only for the remainder of this call. `max_retries` bounds the retries,
/// so a call makes at most `max_retries + 1` attempts.
#[derive(Debug)]
pub struct RetryState {
    max_retries: u32,
    attempts: u32,
    failed: HashSet<SocketAddr>,
    last_error: Option<HotRodError>,
}

impl RetryState {
    /// Creates state allowing `max_retries` retries after the first attempt.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            attempts: 0,
            failed: HashSet::new(),
            last_error: None,
        }
    }

    /// Counts an attempt as begun and returns its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// Attempts begun so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Servers excluded from the remaining attempts of this call.
    pub fn failed_servers(&self) -> &HashSet<SocketAddr> {
        &self.failed
    }

    /// Records a failed attempt against `target` and decides whether the
    /// call continues.
    ///
    /// `retriable_op` is `false` for non-idempotent operations; those fail
    /// on the first error regardless of its class.
    pub fn on_failure(
        &mut self,
        target: Option<SocketAddr>,
        error: HotRodError,
        retriable_op: bool,
    ) -> RetryDecision {
        if error.blacklists_server() {
            if let Some(addr) = target {
                self.failed.insert(addr);
            }
        }
        let retry = retriable_op && error.is_retriable() && self.attempts <= self.max_retries;
        if retry {
            warn!(
                attempt = self.attempts,
                max_retries = self.max_retries,
                error = %error,
                "attempt failed, retrying"
            );
        }
        self.last_error = Some(error);
        if retry {
            RetryDecision::Retry
        } else {
            RetryDecision::Fail
        }
    }

    /// Consumes the state into the call's terminal error.
    pub fn into_error(self) -> HotRodError {
        self.last_error.unwrap_or_else(|| {
            HotRodError::NoServersAvailable("operation failed before any attempt".to_string())
        })
    }
}
