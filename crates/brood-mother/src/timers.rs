use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Monotonic handle for one scheduled wake-up. Never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimerToken(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "action_version", rename_all = "snake_case")]
pub enum TimerTag {
    IdleAttract,
    IdleInference,
    Cooldown,
    InferenceDeadline(u64),
    GenerationDeadline(u64),
    InferenceRetry(u64),
    GenerationRetry(u64),
    /// Bounds how long Watching waits for labels before giving up on the cycle.
    LabelWait,
}

impl TimerTag {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::IdleAttract => "idle_attract",
            Self::IdleInference => "idle_inference",
            Self::Cooldown => "cooldown",
            Self::InferenceDeadline(_) => "inference_deadline",
            Self::GenerationDeadline(_) => "generation_deadline",
            Self::InferenceRetry(_) => "inference_retry",
            Self::GenerationRetry(_) => "generation_retry",
            Self::LabelWait => "label_wait",
        }
    }

    /// Idle and cooldown windows belong to the phase that armed them.
    pub fn is_phase_scoped(&self) -> bool {
        matches!(self, Self::IdleAttract | Self::IdleInference | Self::Cooldown)
    }

    pub fn is_inference(&self) -> bool {
        matches!(
            self,
            Self::InferenceDeadline(_) | Self::InferenceRetry(_) | Self::LabelWait
        )
    }

    pub fn is_generation(&self) -> bool {
        matches!(self, Self::GenerationDeadline(_) | Self::GenerationRetry(_))
    }
}

/// Bookkeeping for live timer tokens.
///
/// Cancelling forgets the token; the underlying wake-up may still arrive and is then ignored.
#[derive(Debug, Default)]
pub struct TimerScheduler {
    next: u64,
    live: IndexMap<TimerToken, TimerTag>,
}

impl TimerScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, tag: TimerTag) -> TimerToken {
        self.next += 1;
        let token = TimerToken(self.next);
        self.live.insert(token, tag);
        token
    }

    /// Consumes a fired token. `None` means it was cancelled or already fired.
    pub fn take(&mut self, token: TimerToken) -> Option<TimerTag> {
        self.live.shift_remove(&token)
    }

    pub fn cancel_where(&mut self, mut predicate: impl FnMut(&TimerTag) -> bool) -> usize {
        let before = self.live.len();
        self.live.retain(|_, tag| !predicate(&*tag));
        before - self.live.len()
    }

    pub fn cancel_all(&mut self) -> usize {
        let count = self.live.len();
        self.live.clear();
        count
    }

    pub fn live(&self) -> Vec<(TimerToken, TimerTag)> {
        self.live.iter().map(|(token, tag)| (*token, *tag)).collect()
    }

    pub fn is_live(&self, tag: &TimerTag) -> bool {
        self.live.values().any(|live| live == tag)
    }
}
