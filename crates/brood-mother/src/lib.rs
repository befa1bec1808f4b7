//! Mother: the autonomous proposal orchestrator.
//!
//! Watches canvas idleness, infers intent over the realtime channel, drafts one generation,
//! offers it, and commits or discards it. All inbound traffic is a closed [`InboundEvent`] enum
//! consumed one event at a time by [`Orchestrator::handle`].

pub mod actor;
pub mod collaborators;
pub mod config;
pub mod correlator;
pub mod diversifier;
pub mod dryrun;
pub mod error;
pub mod event;
pub mod orchestrator;
pub mod phase;
pub mod placement;
pub mod prompt;
pub mod recovery;
pub mod session;
pub mod timers;

pub use actor::MotherHandle;
pub use collaborators::Collaborators;
pub use config::MotherConfig;
pub use error::MotherError;
pub use event::InboundEvent;
pub use orchestrator::{Orchestrator, Step};
pub use phase::{transition, Phase, Trigger};
pub use session::{IntentSnapshot, SessionView};
