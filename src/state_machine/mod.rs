mod job;
mod state;

pub use job::{ChapterMachine, JobMachine};
pub use state::{RevisionEvent, RevisionMachine, RevisionState, Transition};
