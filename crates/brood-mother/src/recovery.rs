use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::error_chain_message;

const TRANSIENT_PHRASES: [&str; 6] = [
    "socket closed",
    "send failed",
    "read failed",
    "connection reset",
    "broken pipe",
    "timed out",
];
const TERMINAL_PHRASES: [&str; 1] = ["parse failed"];

/// A realtime channel failure as reported by the worker.
///
/// Explicit `fatal`/`retryable` flags win over the message text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportFailure {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatal: Option<bool>,
}

impl TransportFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: None,
            fatal: None,
        }
    }

    pub fn with_flags(mut self, retryable: Option<bool>, fatal: Option<bool>) -> Self {
        self.retryable = retryable;
        self.fatal = fatal;
        self
    }

    pub fn from_error(err: &anyhow::Error) -> Self {
        Self::new(error_chain_message(err))
    }

    pub fn is_retryable(&self) -> bool {
        if self.fatal == Some(true) {
            return false;
        }
        if let Some(retryable) = self.retryable {
            return retryable;
        }
        let lowered = self.message.to_ascii_lowercase();
        if TERMINAL_PHRASES
            .iter()
            .any(|phrase| lowered.contains(phrase))
        {
            return false;
        }
        TRANSIENT_PHRASES
            .iter()
            .any(|phrase| lowered.contains(phrase))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailReason {
    NonRetryable,
    RetryExhausted,
}

impl FailReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NonRetryable => "non_retryable",
            Self::RetryExhausted => "retry_exhausted",
        }
    }
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryDecision {
    Retry,
    /// Keep waiting on the current worker for this much longer instead of re-issuing.
    DeferRetry(Duration),
    Fail(FailReason),
}

impl RecoveryDecision {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::DeferRetry(_) => "defer_retry",
            Self::Fail(FailReason::NonRetryable) => "fail_non_retryable",
            Self::Fail(FailReason::RetryExhausted) => "fail_retry_exhausted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryCounters {
    pub retry_count: u32,
    pub max_retries: u32,
}

impl RetryCounters {
    pub fn new(max_retries: u32) -> Self {
        Self {
            retry_count: 0,
            max_retries,
        }
    }

    /// A new logical request starts with a fresh budget.
    pub fn reset(&mut self) {
        self.retry_count = 0;
    }

    pub fn record_retry(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
    }

    pub fn remaining(&self) -> u32 {
        self.max_retries.saturating_sub(self.retry_count)
    }
}

/// Callers must already have checked that the failure belongs to the pending request.
pub fn decide(failure: &TransportFailure, counters: &RetryCounters) -> RecoveryDecision {
    if !failure.is_retryable() {
        return RecoveryDecision::Fail(FailReason::NonRetryable);
    }
    if counters.retry_count < counters.max_retries {
        RecoveryDecision::Retry
    } else {
        RecoveryDecision::Fail(FailReason::RetryExhausted)
    }
}

/// Timing of the request currently held by the realtime worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferWindow {
    pub elapsed: Duration,
    pub worker_timeout_floor: Duration,
    pub grace: Duration,
}

/// Like [`decide`], but prefers waiting on a worker that may still answer over re-issuing.
pub fn decide_deferred(
    failure: &TransportFailure,
    counters: &RetryCounters,
    window: DeferWindow,
) -> RecoveryDecision {
    match decide(failure, counters) {
        RecoveryDecision::Retry
            if window.elapsed + window.grace < window.worker_timeout_floor =>
        {
            RecoveryDecision::DeferRetry(window.worker_timeout_floor - window.elapsed)
        }
        decision => decision,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{
        decide, decide_deferred, DeferWindow, FailReason, RecoveryDecision, RetryCounters,
        TransportFailure,
    };

    #[test]
    fn two_retries_then_exhausted() {
        let failure = TransportFailure::new("realtime socket closed");
        let mut counters = RetryCounters::new(2);
        let mut decisions = Vec::new();
        for _ in 0..3 {
            let decision = decide(&failure, &counters);
            if decision == RecoveryDecision::Retry {
                counters.record_retry();
            }
            decisions.push(decision);
        }
        assert_eq!(
            decisions,
            vec![
                RecoveryDecision::Retry,
                RecoveryDecision::Retry,
                RecoveryDecision::Fail(FailReason::RetryExhausted),
            ]
        );
        assert_eq!(counters.remaining(), 0);
        counters.reset();
        assert_eq!(counters.remaining(), 2);
    }

    #[test]
    fn non_retryable_fails_regardless_of_budget() {
        let counters = RetryCounters::new(6);
        for failure in [
            TransportFailure::new("realtime parse failed: expected value"),
            TransportFailure::new("model refused"),
            TransportFailure::new("socket closed").with_flags(Some(true), Some(true)),
        ] {
            assert_eq!(
                decide(&failure, &counters),
                RecoveryDecision::Fail(FailReason::NonRetryable),
                "{}",
                failure.message
            );
        }
    }

    #[test]
    fn explicit_flags_override_phrase_matching() {
        let failure = TransportFailure::new("upstream hiccup").with_flags(Some(true), None);
        assert!(failure.is_retryable());
        let failure = TransportFailure::new("send failed").with_flags(Some(false), None);
        assert!(!failure.is_retryable());
    }

    #[test]
    fn read_timeouts_are_transient() {
        let counters = RetryCounters::new(2);
        let failure = TransportFailure::new("realtime read failed: operation timed out");
        assert!(failure.is_retryable());
        assert_eq!(decide(&failure, &counters), RecoveryDecision::Retry);
        assert_eq!(
            decide(&TransportFailure::new("request timed out"), &counters),
            RecoveryDecision::Retry
        );
    }

    #[test]
    fn classification_reads_the_whole_error_chain() {
        let err = anyhow::anyhow!("connection reset by peer").context("realtime read failed");
        let failure = TransportFailure::from_error(&err);
        assert!(failure.message.contains("connection reset"));
        assert!(failure.is_retryable());
    }

    #[test]
    fn deferred_retry_waits_on_a_live_worker() {
        let failure = TransportFailure::new("send failed");
        let counters = RetryCounters::new(2);
        let young = DeferWindow {
            elapsed: Duration::from_secs(10),
            worker_timeout_floor: Duration::from_secs(42),
            grace: Duration::from_secs(2),
        };
        assert_eq!(
            decide_deferred(&failure, &counters, young),
            RecoveryDecision::DeferRetry(Duration::from_secs(32))
        );

        let old = DeferWindow {
            elapsed: Duration::from_secs(41),
            ..young
        };
        assert_eq!(decide_deferred(&failure, &counters, old), RecoveryDecision::Retry);

        let exhausted = RetryCounters {
            retry_count: 2,
            max_retries: 2,
        };
        assert_eq!(
            decide_deferred(&failure, &exhausted, young),
            RecoveryDecision::Fail(FailReason::RetryExhausted)
        );
    }
}
