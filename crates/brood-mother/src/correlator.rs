use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Inference,
    Generation,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inference => "inference",
            Self::Generation => "generation",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchKind {
    /// Once current, since superseded, consumed or cancelled.
    Stale,
    /// Never issued by this session.
    OutOfBand,
}

impl MismatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stale => "stale",
            Self::OutOfBand => "out_of_band",
        }
    }
}

impl fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One outstanding request on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchRecord {
    pub action_version: u64,
    pub pending_result_id: Option<String>,
    /// Canvas snapshot the request was issued against.
    pub snapshot_path: Option<String>,
    pub dispatched_at_ms: u64,
    pub deadline_ms: Option<u64>,
    pub extension: Option<Duration>,
    pub extensions: u32,
}

impl DispatchRecord {
    pub fn can_extend(&self) -> bool {
        self.extensions < MAX_EXTENSIONS
    }
}

pub const MAX_EXTENSIONS: u32 = 1;

/// Identity an inbound result claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultKey<'a> {
    pub action_version: u64,
    pub snapshot_path: Option<&'a str>,
    pub result_id: Option<&'a str>,
}

impl<'a> ResultKey<'a> {
    pub fn version(action_version: u64) -> Self {
        Self {
            action_version,
            snapshot_path: None,
            result_id: None,
        }
    }

    pub fn with_path(mut self, snapshot_path: Option<&'a str>) -> Self {
        self.snapshot_path = snapshot_path;
        self
    }

    pub fn with_result_id(mut self, result_id: Option<&'a str>) -> Self {
        self.result_id = result_id;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correlation {
    Accepted,
    Stale,
    OutOfBand,
    /// Arrived inside the grace window after a cancellation. Discard, do not place.
    DiscardAfterCancel,
}

impl Correlation {
    pub fn mismatch(self) -> Option<MismatchKind> {
        match self {
            Self::Stale => Some(MismatchKind::Stale),
            Self::OutOfBand => Some(MismatchKind::OutOfBand),
            Self::Accepted | Self::DiscardAfterCancel => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutOutcome {
    Extended(Duration),
    Expired,
    NotCurrent,
}

/// Binds exactly one outstanding request per channel to its result.
///
/// - a result is accepted at most once; acceptance retires the record
/// - superseded, consumed and cancelled versions are remembered (bounded) as stale
/// - mismatches never mutate state
#[derive(Debug)]
pub struct DispatchCorrelator {
    channel: Channel,
    current: Option<DispatchRecord>,
    ignored: VecDeque<u64>,
    ignored_limit: usize,
    cancelled: VecDeque<(u64, u64)>,
    cancel_grace: Duration,
}

impl DispatchCorrelator {
    pub fn new(channel: Channel, ignored_limit: usize, cancel_grace: Duration) -> Self {
        Self {
            channel,
            current: None,
            ignored: VecDeque::new(),
            ignored_limit: ignored_limit.max(1),
            cancelled: VecDeque::new(),
            cancel_grace,
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn current(&self) -> Option<&DispatchRecord> {
        self.current.as_ref()
    }

    pub fn bind(
        &mut self,
        action_version: u64,
        snapshot_path: Option<String>,
        now_ms: u64,
    ) -> &DispatchRecord {
        self.retire_current();
        self.current.insert(DispatchRecord {
            action_version,
            pending_result_id: None,
            snapshot_path,
            dispatched_at_ms: now_ms,
            deadline_ms: None,
            extension: None,
            extensions: 0,
        })
    }

    /// Sets the deadline of the current record. Returns its version when one is bound.
    pub fn arm_timeout(
        &mut self,
        timeout: Duration,
        extension: Option<Duration>,
        now_ms: u64,
    ) -> Option<u64> {
        let record = self.current.as_mut()?;
        record.deadline_ms = Some(now_ms.saturating_add(duration_ms(timeout)));
        record.extension = extension;
        Some(record.action_version)
    }

    /// Records the provider's result id for the current request.
    pub fn acknowledge(&mut self, action_version: u64, result_id: &str) -> Correlation {
        let Some(record) = self
            .current
            .as_mut()
            .filter(|record| record.action_version == action_version)
        else {
            return self.classify_unbound(action_version, None);
        };
        match record.pending_result_id.as_deref() {
            Some(existing) if existing != result_id => Correlation::Stale,
            _ => {
                record.pending_result_id = Some(result_id.to_string());
                Correlation::Accepted
            }
        }
    }

    /// Classifies without consuming. Streaming partials use this before they are usable.
    pub fn peek(&self, key: ResultKey<'_>, now_ms: u64) -> Correlation {
        match self.current.as_ref() {
            Some(record) if record.action_version == key.action_version => {
                if declared_mismatch(record.snapshot_path.as_deref(), key.snapshot_path)
                    || declared_mismatch(record.pending_result_id.as_deref(), key.result_id)
                {
                    Correlation::Stale
                } else {
                    Correlation::Accepted
                }
            }
            _ => self.classify_unbound(key.action_version, Some(now_ms)),
        }
    }

    /// Classifies and, on acceptance or late discard, consumes.
    pub fn observe(&mut self, key: ResultKey<'_>, now_ms: u64) -> Correlation {
        let correlation = self.peek(key, now_ms);
        match correlation {
            Correlation::Accepted => {
                self.retire_current();
            }
            Correlation::DiscardAfterCancel => {
                self.cancelled
                    .retain(|(version, _)| *version != key.action_version);
            }
            Correlation::Stale | Correlation::OutOfBand => {}
        }
        correlation
    }

    /// Takes the current record out of correlation, e.g. when it failed terminally.
    pub fn consume(&mut self) -> Option<DispatchRecord> {
        let record = self.current.take()?;
        self.remember_ignored(record.action_version);
        Some(record)
    }

    /// Grants the single extension to the current request, pushing its deadline to `now + extra`.
    pub fn extend(&mut self, action_version: u64, extra: Duration, now_ms: u64) -> bool {
        let Some(record) = self
            .current
            .as_mut()
            .filter(|record| record.action_version == action_version && record.can_extend())
        else {
            return false;
        };
        record.extensions += 1;
        record.deadline_ms = Some(now_ms.saturating_add(duration_ms(extra)));
        true
    }

    /// A deadline fired. Grants the armed extension once, then expires the request.
    pub fn on_timeout(&mut self, action_version: u64, now_ms: u64) -> TimeoutOutcome {
        let Some(record) = self
            .current
            .as_mut()
            .filter(|record| record.action_version == action_version)
        else {
            return TimeoutOutcome::NotCurrent;
        };
        let extension = record.extension.filter(|_| record.can_extend());
        match extension {
            Some(extra) => {
                record.extensions += 1;
                record.deadline_ms = Some(now_ms.saturating_add(duration_ms(extra)));
                TimeoutOutcome::Extended(extra)
            }
            None => {
                self.retire_current();
                TimeoutOutcome::Expired
            }
        }
    }

    /// User cancellation. A result that still arrives inside the grace window is discarded.
    pub fn cancel(&mut self, now_ms: u64) -> Option<u64> {
        let record = self.consume()?;
        self.cancelled.push_back((record.action_version, now_ms));
        while self.cancelled.len() > self.ignored_limit {
            self.cancelled.pop_front();
        }
        Some(record.action_version)
    }

    /// Drops the current record without a grace window.
    pub fn abandon(&mut self) -> Option<u64> {
        self.consume().map(|record| record.action_version)
    }

    pub fn is_ignored(&self, action_version: u64) -> bool {
        self.ignored.contains(&action_version)
    }

    fn classify_unbound(&self, action_version: u64, now_ms: Option<u64>) -> Correlation {
        if let Some(now_ms) = now_ms {
            let grace_ms = duration_ms(self.cancel_grace);
            let in_grace = self.cancelled.iter().any(|(version, cancelled_at)| {
                *version == action_version && now_ms.saturating_sub(*cancelled_at) < grace_ms
            });
            if in_grace {
                return Correlation::DiscardAfterCancel;
            }
        }
        if self.is_ignored(action_version) {
            Correlation::Stale
        } else {
            Correlation::OutOfBand
        }
    }

    fn retire_current(&mut self) {
        if let Some(record) = self.current.take() {
            self.remember_ignored(record.action_version);
        }
    }

    fn remember_ignored(&mut self, action_version: u64) {
        if self.ignored.contains(&action_version) {
            return;
        }
        self.ignored.push_back(action_version);
        while self.ignored.len() > self.ignored_limit {
            self.ignored.pop_front();
        }
    }
}

/// Only values both sides declare are compared.
fn declared_mismatch(recorded: Option<&str>, declared: Option<&str>) -> bool {
    matches!((recorded, declared), (Some(recorded), Some(declared)) if recorded != declared)
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{
        Channel, Correlation, DispatchCorrelator, MismatchKind, ResultKey, TimeoutOutcome,
    };

    fn correlator() -> DispatchCorrelator {
        DispatchCorrelator::new(Channel::Generation, 4, Duration::from_millis(3_000))
    }

    #[test]
    fn current_version_and_path_is_accepted_once() {
        let mut correlator = correlator();
        correlator.bind(1, Some("mother-intent-a1.png".into()), 0);
        let key = ResultKey::version(1).with_path(Some("mother-intent-a1.png"));

        assert_eq!(correlator.peek(key, 10), Correlation::Accepted);
        assert!(correlator.current().is_some());
        assert_eq!(correlator.observe(key, 10), Correlation::Accepted);
        assert!(correlator.current().is_none());
        assert_eq!(correlator.observe(key, 20), Correlation::Stale);
    }

    #[test]
    fn superseded_is_stale_and_unknown_is_out_of_band() {
        let mut correlator = correlator();
        correlator.bind(1, None, 0);
        correlator.bind(2, None, 5);

        assert_eq!(
            correlator.observe(ResultKey::version(1), 10),
            Correlation::Stale
        );
        assert_eq!(
            correlator.observe(ResultKey::version(77), 10),
            Correlation::OutOfBand
        );
        assert_eq!(Correlation::OutOfBand.mismatch(), Some(MismatchKind::OutOfBand));
        let current = correlator.current().map(|record| record.action_version);
        assert_eq!(current, Some(2));
    }

    #[test]
    fn path_mismatch_is_stale_even_when_version_matches() {
        let mut correlator = correlator();
        correlator.bind(3, Some("mother-intent-a3.png".into()), 0);
        let wrong = ResultKey::version(3).with_path(Some("mother-intent-a2.png"));
        assert_eq!(correlator.observe(wrong, 1), Correlation::Stale);
        assert!(correlator.current().is_some());
    }

    #[test]
    fn acknowledged_result_id_must_match() {
        let mut correlator = correlator();
        correlator.bind(4, None, 0);
        assert_eq!(correlator.acknowledge(4, "res-a"), Correlation::Accepted);
        assert_eq!(correlator.acknowledge(4, "res-b"), Correlation::Stale);
        assert_eq!(correlator.acknowledge(9, "res-c"), Correlation::OutOfBand);

        let other = ResultKey::version(4).with_result_id(Some("res-b"));
        assert_eq!(correlator.observe(other, 1), Correlation::Stale);
        let echoed = ResultKey::version(4).with_result_id(Some("res-a"));
        assert_eq!(correlator.observe(echoed, 1), Correlation::Accepted);
    }

    #[test]
    fn one_extension_then_expiry() {
        let mut correlator = correlator();
        correlator.bind(5, None, 0);
        correlator.arm_timeout(
            Duration::from_millis(100),
            Some(Duration::from_millis(50)),
            0,
        );
        assert_eq!(
            correlator.current().and_then(|record| record.deadline_ms),
            Some(100)
        );

        assert_eq!(correlator.on_timeout(4, 100), TimeoutOutcome::NotCurrent);
        assert_eq!(
            correlator.on_timeout(5, 100),
            TimeoutOutcome::Extended(Duration::from_millis(50))
        );
        assert_eq!(correlator.on_timeout(5, 150), TimeoutOutcome::Expired);
        assert!(correlator.current().is_none());
        assert!(correlator.is_ignored(5));
    }

    #[test]
    fn explicit_extension_uses_up_the_timeout_extension() {
        let mut correlator = correlator();
        correlator.bind(6, None, 0);
        correlator.arm_timeout(
            Duration::from_millis(100),
            Some(Duration::from_millis(50)),
            0,
        );
        assert!(correlator.extend(6, Duration::from_millis(30), 100));
        assert_eq!(
            correlator.current().and_then(|record| record.deadline_ms),
            Some(130)
        );
        assert!(!correlator.extend(6, Duration::from_millis(30), 100));
        assert_eq!(correlator.on_timeout(6, 130), TimeoutOutcome::Expired);
    }

    #[test]
    fn cancelled_results_are_discarded_inside_grace_then_stale() {
        let mut correlator = correlator();
        correlator.bind(7, None, 0);
        assert_eq!(correlator.cancel(1_000), Some(7));
        assert_eq!(
            correlator.observe(ResultKey::version(7), 2_000),
            Correlation::DiscardAfterCancel
        );
        assert_eq!(
            correlator.observe(ResultKey::version(7), 2_100),
            Correlation::Stale
        );

        correlator.bind(8, None, 3_000);
        correlator.cancel(3_000);
        assert_eq!(
            correlator.observe(ResultKey::version(8), 9_000),
            Correlation::Stale
        );
    }

    #[test]
    fn ignored_set_is_bounded() {
        let mut correlator = correlator();
        for version in 1..=6 {
            correlator.bind(version, None, 0);
        }
        assert!(!correlator.is_ignored(1));
        assert!(correlator.is_ignored(2));
        assert_eq!(
            correlator.observe(ResultKey::version(1), 0),
            Correlation::OutOfBand
        );
    }
}
