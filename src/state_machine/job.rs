use chrono::Utc;

use crate::error::StageError;
use crate::model::{Chapter, ChapterStatus, Job, JobStatus};

/// Status transitions for a [`Job`].
///
/// PENDING → RUNNING → (COMPLETED | FAILED); PENDING → FAILED on rejected input.
pub struct JobMachine;

impl JobMachine {
    pub fn start(job: &mut Job) -> Result<(), StageError> {
        Self::apply(job, JobStatus::Running)
    }

    pub fn complete(job: &mut Job) -> Result<(), StageError> {
        Self::apply(job, JobStatus::Completed)
    }

    pub fn fail(job: &mut Job, reason: impl Into<String>) -> Result<(), StageError> {
        Self::apply(job, JobStatus::Failed)?;
        job.error = Some(reason.into());
        Ok(())
    }

    pub fn allowed(from: JobStatus, to: JobStatus) -> bool {
        matches!(
            (from, to),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }

    fn apply(job: &mut Job, to: JobStatus) -> Result<(), StageError> {
        if !Self::allowed(job.status, to) {
            return Err(StageError::Validation(format!(
                "job {} cannot move from {} to {to}",
                job.id, job.status
            )));
        }
        job.status_history.push(job.status);
        job.status = to;
        if to.is_terminal() {
            job.completed_at = Some(Utc::now());
        }
        Ok(())
    }
}

/// Status transitions for a [`Chapter`].
///
/// QUEUED → RESEARCHING → DRAFTING ⇄ REVIEWING → APPROVED, with FAILED
/// reachable from every non-terminal state.
pub struct ChapterMachine;

impl ChapterMachine {
    pub fn allowed(from: ChapterStatus, to: ChapterStatus) -> bool {
        use ChapterStatus::*;
        matches!(
            (from, to),
            (Queued, Researching)
                | (Researching, Drafting)
                | (Drafting, Reviewing)
                | (Reviewing, Drafting)
                | (Reviewing, Approved)
                | (Queued | Researching | Drafting | Reviewing, Failed)
        )
    }

    pub fn advance(chapter: &mut Chapter, to: ChapterStatus) -> Result<(), StageError> {
        if !Self::allowed(chapter.status, to) {
            return Err(StageError::Validation(format!(
                "chapter {} cannot move from {} to {to}",
                chapter.index, chapter.status
            )));
        }
        chapter.status_history.push(chapter.status);
        chapter.status = to;
        Ok(())
    }

    pub fn fail(chapter: &mut Chapter, reason: impl Into<String>) -> Result<(), StageError> {
        Self::advance(chapter, ChapterStatus::Failed)?;
        chapter.error = Some(reason.into());
        Ok(())
    }
}
