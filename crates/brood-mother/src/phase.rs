use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Observing,
    Watching,
    Hypothesizing,
    Drafting,
    Offering,
    Committing,
    Cooldown,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Self::Observing,
        Self::Watching,
        Self::Hypothesizing,
        Self::Drafting,
        Self::Offering,
        Self::Committing,
        Self::Cooldown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Observing => "observing",
            Self::Watching => "watching",
            Self::Hypothesizing => "hypothesizing",
            Self::Drafting => "drafting",
            Self::Offering => "offering",
            Self::Committing => "committing",
            Self::Cooldown => "cooldown",
        }
    }

    /// The realtime inference visual is a function of phase alone.
    pub fn shows_realtime_visual(self) -> bool {
        self == Self::Watching
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    IdleElapsed,
    Confirm,
    Reject,
    DraftReady,
    Deploy,
    CommitDone,
    CooldownDone,
    /// Synthesized failure path. Acts like `Reject` but never records rejection memory.
    Abort,
    UserInteraction,
    Disqualify,
    Reset,
}

impl Trigger {
    pub const ALL: [Trigger; 11] = [
        Self::IdleElapsed,
        Self::Confirm,
        Self::Reject,
        Self::DraftReady,
        Self::Deploy,
        Self::CommitDone,
        Self::CooldownDone,
        Self::Abort,
        Self::UserInteraction,
        Self::Disqualify,
        Self::Reset,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::IdleElapsed => "idle_elapsed",
            Self::Confirm => "confirm",
            Self::Reject => "reject",
            Self::DraftReady => "draft_ready",
            Self::Deploy => "deploy",
            Self::CommitDone => "commit_done",
            Self::CooldownDone => "cooldown_done",
            Self::Abort => "abort",
            Self::UserInteraction => "user_interaction",
            Self::Disqualify => "disqualify",
            Self::Reset => "reset",
        }
    }

    pub fn is_safety_valve(self) -> bool {
        matches!(self, Self::UserInteraction | Self::Disqualify | Self::Reset)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Total transition table. Anything not wired leaves the phase unchanged.
pub fn transition(current: Phase, trigger: Trigger) -> Phase {
    if trigger.is_safety_valve() {
        return Phase::Observing;
    }
    match (current, trigger) {
        (Phase::Observing, Trigger::IdleElapsed) => Phase::Watching,
        (Phase::Watching, Trigger::IdleElapsed) => Phase::Hypothesizing,
        (Phase::Hypothesizing, Trigger::Confirm) => Phase::Drafting,
        (Phase::Drafting, Trigger::DraftReady) => Phase::Offering,
        (Phase::Offering, Trigger::Deploy) => Phase::Committing,
        (Phase::Committing, Trigger::CommitDone) => Phase::Cooldown,
        (Phase::Cooldown, Trigger::CooldownDone) => Phase::Observing,
        (Phase::Hypothesizing | Phase::Drafting | Phase::Offering, Trigger::Reject) => {
            Phase::Cooldown
        }
        (
            Phase::Watching
            | Phase::Hypothesizing
            | Phase::Drafting
            | Phase::Offering
            | Phase::Committing,
            Trigger::Abort,
        ) => Phase::Cooldown,
        (phase, _) => phase,
    }
}
