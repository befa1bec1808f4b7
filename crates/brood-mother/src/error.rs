use brood_contracts::intent::ParseFailure;

use crate::correlator::{Channel, MismatchKind};
use crate::recovery::FailReason;

/// Failures the orchestrator absorbs. None of these unwind past [`crate::Orchestrator::handle`];
/// each one becomes a phase transition plus an event-log line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MotherError {
    #[error("intent payload could not be recovered: {0}")]
    ParseFailure(ParseFailure),
    #[error("{channel} result ignored: {kind}")]
    CorrelationMismatch {
        channel: Channel,
        kind: MismatchKind,
    },
    #[error("{channel} transport failed: {reason}")]
    TransportFailure { channel: Channel, reason: FailReason },
    #[error("{channel} timed out after its extension")]
    TimeoutExceeded { channel: Channel },
    #[error("generation dispatch was not armed: {0}")]
    DispatchUnarmed(String),
    #[error("commit failed: {0}")]
    CommitFailed(String),
}

impl MotherError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ParseFailure(_) => "parse_failure",
            Self::CorrelationMismatch { .. } => "correlation_mismatch",
            Self::TransportFailure { .. } => "transport_failure",
            Self::TimeoutExceeded { .. } => "timeout_exceeded",
            Self::DispatchUnarmed(_) => "dispatch_unarmed",
            Self::CommitFailed(_) => "commit_failed",
        }
    }

    /// Whether the user sees this as "no proposal this cycle". Mismatches never surface.
    pub fn ends_cycle(&self) -> bool {
        !matches!(self, Self::CorrelationMismatch { .. })
    }
}

/// Renders the whole context chain of a collaborator error on one line.
pub fn error_chain_message(err: &anyhow::Error) -> String {
    err.chain()
        .map(|entry| entry.to_string())
        .filter(|entry| !entry.trim().is_empty())
        .collect::<Vec<String>>()
        .join(": ")
}

#[cfg(test)]
mod tests {
    use brood_contracts::intent::ParseFailure;

    use super::{error_chain_message, MotherError};
    use crate::correlator::{Channel, MismatchKind};
    use crate::recovery::FailReason;

    #[test]
    fn display_uses_stable_codes() {
        let err = MotherError::TransportFailure {
            channel: Channel::Inference,
            reason: FailReason::RetryExhausted,
        };
        assert_eq!(err.to_string(), "inference transport failed: retry_exhausted");
        assert_eq!(err.code(), "transport_failure");

        let err = MotherError::ParseFailure(ParseFailure::NoIntentShape);
        assert_eq!(
            err.to_string(),
            "intent payload could not be recovered: no_intent_shape"
        );
    }

    #[test]
    fn mismatches_never_end_a_cycle() {
        let mismatch = MotherError::CorrelationMismatch {
            channel: Channel::Generation,
            kind: MismatchKind::Stale,
        };
        assert!(!mismatch.ends_cycle());
        assert!(MotherError::DispatchUnarmed("spawn failed".into()).ends_cycle());
    }

    #[test]
    fn chain_message_joins_context() {
        let err = anyhow::anyhow!("socket closed").context("realtime read failed");
        assert_eq!(error_chain_message(&err), "realtime read failed: socket closed");
    }
}
