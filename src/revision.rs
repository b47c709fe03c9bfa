use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::context::JobContext;
use crate::error::StageError;
use crate::model::{Chapter, ChapterStatus, FactSheet, RevisionAttempt};
use crate::stages::draft::{self, DraftOutput, RevisionContext};
use crate::stages::{Stage, code, review};
use crate::state_machine::{ChapterMachine, RevisionEvent, RevisionMachine, RevisionState, Transition};

/// How a chapter left the revision loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChapterOutcome {
    Approved,
    /// Revisions ran out; the chapter is failed but keeps its best attempt.
    Exhausted,
    /// A stage failed outright.
    Failed(StageError),
}

/// Runs the Draft ⇄ Review loop for a single chapter.
pub struct RevisionController<'a> {
    ctx: &'a JobContext,
}

impl<'a> RevisionController<'a> {
    pub fn new(ctx: &'a JobContext) -> Self {
        Self { ctx }
    }

    /// Drive `chapter` from its research state to `Approved` or `Failed`.
    ///
    /// Every attempt is appended to `chapter.attempts`. On any terminal path
    /// other than approval the best attempt so far becomes the chapter draft.
    pub async fn run(&self, chapter: &mut Chapter, facts: &FactSheet, digest: &str) -> ChapterOutcome {
        match self.drive(chapter, facts, digest).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(job_id = %self.ctx.job_id, chapter = chapter.index, error = %e, "chapter failed");
                chapter.draft = chapter.best_attempt().map(|a| a.draft.clone());
                if !chapter.status.is_terminal() {
                    if let Err(fsm) = ChapterMachine::fail(chapter, e.to_string()) {
                        warn!(chapter = chapter.index, error = %fsm, "could not mark chapter failed");
                    }
                }
                ChapterOutcome::Failed(e)
            }
        }
    }

    async fn drive(
        &self,
        chapter: &mut Chapter,
        facts: &FactSheet,
        digest: &str,
    ) -> Result<ChapterOutcome, StageError> {
        let ctx = self.ctx;
        let mut machine = RevisionMachine::new(ctx.settings.max_revisions);
        let mut revision: Option<RevisionContext> = None;

        loop {
            ctx.check_continue()?;
            let number = machine.attempt();
            ChapterMachine::advance(chapter, ChapterStatus::Drafting)?;
            debug!(job_id = %ctx.job_id, chapter = chapter.index, attempt = number, "drafting");

            let started = Instant::now();
            let drafted = draft::run(ctx, chapter, facts, digest, revision.as_ref()).await;
            self.record(Stage::Draft, chapter, started, &drafted).await;
            let DraftOutput { mut content, artifacts } = drafted?;

            if ctx.include_code() && !artifacts.is_empty() {
                ctx.check_continue()?;
                let started = Instant::now();
                let examples = code::run(ctx, chapter, &artifacts).await;
                self.record(Stage::Code, chapter, started, &examples).await;
                content.code_examples = examples?;
            }

            machine.next(RevisionEvent::Drafted)?;
            ChapterMachine::advance(chapter, ChapterStatus::Reviewing)?;
            ctx.check_continue()?;

            let started = Instant::now();
            let reviewed = review::run(ctx, chapter, &content).await;
            self.record(Stage::Review, chapter, started, &reviewed).await;
            let verdict = reviewed?;

            let transition = machine.next(RevisionEvent::Reviewed(verdict.verdict))?;
            debug!(
                job_id = %ctx.job_id,
                chapter = chapter.index,
                attempt = number,
                score = verdict.score,
                ?transition,
                "review verdict"
            );
            chapter.attempts.push(RevisionAttempt {
                number,
                draft: content,
                verdict,
            });

            match transition {
                Transition::Complete(RevisionState::Approved) => {
                    chapter.draft = chapter.latest_attempt().map(|a| a.draft.clone());
                    ChapterMachine::advance(chapter, ChapterStatus::Approved)?;
                    info!(job_id = %ctx.job_id, chapter = chapter.index, attempts = number, "chapter approved");
                    return Ok(ChapterOutcome::Approved);
                }
                Transition::Complete(_) => {
                    chapter.draft = chapter.best_attempt().map(|a| a.draft.clone());
                    ChapterMachine::fail(
                        chapter,
                        format!("exhausted {} revision attempts without approval", machine.max_attempts()),
                    )?;
                    warn!(
                        job_id = %ctx.job_id,
                        chapter = chapter.index,
                        best = ?chapter.score(),
                        "revisions exhausted"
                    );
                    return Ok(ChapterOutcome::Exhausted);
                }
                Transition::Revise { attempt } => {
                    debug!(job_id = %ctx.job_id, chapter = chapter.index, attempt, "revising");
                    revision = chapter.latest_attempt().map(RevisionContext::from_rejected);
                }
                Transition::Next(state) => {
                    return Err(StageError::Validation(format!(
                        "unexpected revision state {state} after review"
                    )));
                }
            }
        }
    }

    async fn record<T>(
        &self,
        stage: Stage,
        chapter: &Chapter,
        started: Instant,
        result: &Result<T, StageError>,
    ) {
        let error = result.as_ref().err().map(ToString::to_string);
        self.ctx
            .record_stage(&format!("{stage}.ch{}", chapter.index), started, error.as_deref())
            .await;
    }
}
