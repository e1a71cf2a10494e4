//! Growing LVM-on-LUKS storage: discovery, planning, the resize pipeline
//! and the interactive session that ties them together.

pub mod mismatch;
pub mod orchestrator;
pub mod planner;
pub mod prompt;
pub mod report;
pub mod sequencer;
pub mod state;
pub mod topology;
pub mod types;

pub use orchestrator::Orchestrator;
pub use prompt::{Prompter, TerminalPrompter};
pub use state::Outcome;
