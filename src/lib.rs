//! bookforge: pipeline orchestration for generating structured technical books.
//!
//! A job runs Outline once, then Research and the Draft ⇄ Review revision loop
//! per chapter, then Compile. Every external service sits behind a trait in
//! [`collaborators`] and is called through the [`retry`] executor.

pub mod accumulator;
pub mod anthropic;
pub mod cli;
pub mod collaborators;
pub mod config;
pub mod content;
pub mod context;
pub mod coverage;
pub mod error;
pub mod fanout;
pub mod model;
pub mod orchestrator;
pub mod retry;
pub mod revision;
pub mod stages;
pub mod state_machine;
pub mod ui;

pub use context::CancellationToken;
pub use error::{CallError, FailureKind, PipelineError, StageError};
pub use model::{JobResult, JobSpec};
pub use orchestrator::{JobObserver, JobOrchestrator};
