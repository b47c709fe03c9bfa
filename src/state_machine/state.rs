use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StageError;
use crate::model::Verdict;

/// The four states of the per-chapter revision loop.
///
/// DRAFTING → REVIEWING → (APPROVED | DRAFTING | EXHAUSTED)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevisionState {
    Drafting,
    Reviewing,
    Approved,
    Exhausted,
}

impl RevisionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RevisionState::Approved | RevisionState::Exhausted)
    }
}

impl fmt::Display for RevisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevisionState::Drafting => write!(f, "DRAFTING"),
            RevisionState::Reviewing => write!(f, "REVIEWING"),
            RevisionState::Approved => write!(f, "APPROVED"),
            RevisionState::Exhausted => write!(f, "EXHAUSTED"),
        }
    }
}

/// What just happened in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionEvent {
    Drafted,
    Reviewed(Verdict),
}

/// The result of evaluating a revision transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Advance to the next state within the same attempt.
    Next(RevisionState),
    /// Review asked for changes; draft again as attempt `attempt`.
    Revise { attempt: u32 },
    /// The loop has ended in a terminal state.
    Complete(RevisionState),
}

/// Drives one chapter through the revision loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionMachine {
    state: RevisionState,
    attempt: u32,
    max_attempts: u32,
    history: Vec<RevisionState>,
}

impl RevisionMachine {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: RevisionState::Drafting,
            attempt: 1,
            max_attempts: max_attempts.max(1),
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> RevisionState {
        self.state
    }

    /// Current attempt number, starting at 1.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn history(&self) -> &[RevisionState] {
        &self.history
    }

    /// Compute and apply the next transition.
    ///
    /// - `Drafting` + `Drafted` advances to `Reviewing`.
    /// - `Reviewing` + approved completes as `Approved`.
    /// - `Reviewing` + needs-revision goes back to `Drafting` while attempts
    ///   remain, otherwise completes as `Exhausted`.
    ///
    /// Any other pairing is a programming error and is refused without
    /// changing state.
    pub fn next(&mut self, event: RevisionEvent) -> Result<Transition, StageError> {
        let transition = match (self.state, event) {
            (RevisionState::Drafting, RevisionEvent::Drafted) => {
                Transition::Next(RevisionState::Reviewing)
            }
            (RevisionState::Reviewing, RevisionEvent::Reviewed(Verdict::Approved)) => {
                Transition::Complete(RevisionState::Approved)
            }
            (RevisionState::Reviewing, RevisionEvent::Reviewed(Verdict::NeedsRevision)) => {
                if self.attempt < self.max_attempts {
                    Transition::Revise {
                        attempt: self.attempt + 1,
                    }
                } else {
                    Transition::Complete(RevisionState::Exhausted)
                }
            }
            (state, event) => {
                return Err(StageError::Validation(format!(
                    "invalid revision transition: {event:?} in {state}"
                )));
            }
        };

        self.history.push(self.state);
        match transition {
            Transition::Next(next) | Transition::Complete(next) => self.state = next,
            Transition::Revise { attempt } => {
                self.state = RevisionState::Drafting;
                self.attempt = attempt;
            }
        }

        Ok(transition)
    }
}
