//! Client-side orchestration of one production run: stage ordering, log
//! polling, pause/resume/cancel and the shared run state they all update.

pub mod control;
pub mod controller;
pub mod reporter;
pub mod request;
pub mod sequencer;
pub mod state;

#[cfg(test)]
mod testing;

pub use control::RunControl;
pub use controller::{Collaborators, WorkflowController};
pub use reporter::{PollerHandle, ProgressReporter};
pub use request::{StageBlocked, StageRequest, TitleMode};
pub use sequencer::{Advance, RunOutcome, StageFailure, StagePlan, StageSequencer};
pub use state::{RunHandle, RunPhase, RunState};
