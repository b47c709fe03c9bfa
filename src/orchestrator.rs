use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::collaborators::Collaborators;
use crate::config::BookforgeConfig;
use crate::context::{CancellationToken, JobContext, PipelineSettings};
use crate::error::StageError;
use crate::model::{BookStructure, Chapter, ChapterStatus, HistoryDigest, Job, JobResult, JobSpec};
use crate::retry::RetryPolicy;
use crate::revision::{ChapterOutcome, RevisionController};
use crate::stages::{Stage, compile, outline, research};
use crate::state_machine::{ChapterMachine, JobMachine};

/// Receives progress notifications while a job runs. Both hooks default to no-ops.
pub trait JobObserver: Send + Sync {
    fn stage_started(&self, _stage: Stage, _chapter: Option<&Chapter>) {}
    fn chapter_finished(&self, _chapter: &Chapter) {}
}

/// Drives jobs through Outline, the per-chapter pipeline and Compile.
pub struct JobOrchestrator {
    collaborators: Collaborators,
    policy: RetryPolicy,
    settings: PipelineSettings,
    cancel: CancellationToken,
    observer: Option<Arc<dyn JobObserver>>,
}

impl JobOrchestrator {
    pub fn new(collaborators: Collaborators, policy: RetryPolicy, settings: PipelineSettings) -> Self {
        Self {
            collaborators,
            policy,
            settings,
            cancel: CancellationToken::new(),
            observer: None,
        }
    }

    pub fn from_config(collaborators: Collaborators, config: &BookforgeConfig) -> Self {
        Self::new(collaborators, config.retry_policy(), PipelineSettings::from(config))
    }

    /// Share `token` with the caller so it can cancel running jobs.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn JobObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one job to a terminal status.
    ///
    /// Never returns an error: failures are reported through the result's
    /// status, per-chapter states and `error` field.
    pub async fn run_job(&self, spec: JobSpec) -> JobResult {
        let mut job = Job::new(spec);

        if let Err(e) = job.spec.validate() {
            warn!(job_id = %job.id, error = %e, "job specification rejected");
            self.transition(&mut job, |j| JobMachine::fail(j, e.to_string()));
            return JobResult::from_job(&job, Vec::new(), None);
        }

        info!(job_id = %job.id, title = %job.spec.title, "job accepted");
        self.save_job(&job, true).await;
        self.transition(&mut job, JobMachine::start);
        self.save_job(&job, false).await;

        let ctx = JobContext::new(
            job.id.clone(),
            job.spec.clone(),
            self.collaborators.clone(),
            self.policy.clone(),
            self.settings.clone(),
            self.cancel.clone(),
        );

        let mut chapters = Vec::new();
        let book = match self.pipeline(&ctx, &mut job, &mut chapters).await {
            Ok(book) => {
                self.transition(&mut job, JobMachine::complete);
                info!(
                    job_id = %job.id,
                    chapters = chapters.len(),
                    approved = book.stats.approved,
                    "job completed"
                );
                Some(book)
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, kind = %e.kind(), "job failed");
                self.transition(&mut job, |j| JobMachine::fail(j, e.to_string()));
                None
            }
        };

        self.save_job(&job, false).await;
        JobResult::from_job(&job, chapters, book)
    }

    async fn pipeline(
        &self,
        ctx: &JobContext,
        job: &mut Job,
        chapters: &mut Vec<Chapter>,
    ) -> Result<BookStructure, StageError> {
        ctx.check_continue()?;
        self.notify_stage(Stage::Outline, None);
        let started = Instant::now();
        let outlined = outline::run(ctx).await;
        record(ctx, Stage::Outline.to_string(), started, &outlined).await;
        *chapters = outlined?;

        job.chapters = chapters.iter().map(|c| c.id.clone()).collect();
        for chapter in chapters.iter() {
            self.save_chapter(chapter, true).await;
        }

        let digest = HistoryDigest::from_chapters(chapters);
        let concurrency = ctx.settings.chapter_concurrency.max(1);
        *chapters = stream::iter(std::mem::take(chapters))
            .map(|chapter| self.run_chapter(ctx, chapter, &digest))
            .buffered(concurrency)
            .collect()
            .await;

        ctx.check_continue()?;
        self.notify_stage(Stage::Compile, None);
        let started = Instant::now();
        let compiled = compile::run(ctx, chapters).await;
        record(ctx, Stage::Compile.to_string(), started, &compiled).await;
        compiled
    }

    /// Research, then the revision loop. Always returns the chapter in a terminal state.
    async fn run_chapter(&self, ctx: &JobContext, mut chapter: Chapter, digest: &HistoryDigest) -> Chapter {
        let ready = ctx
            .check_continue()
            .and_then(|()| ChapterMachine::advance(&mut chapter, ChapterStatus::Researching));
        if let Err(e) = ready {
            self.transition_chapter(&mut chapter, e.to_string());
            self.finish_chapter(&chapter).await;
            return chapter;
        }
        self.save_chapter(&chapter, false).await;

        self.notify_stage(Stage::Research, Some(&chapter));
        let started = Instant::now();
        let facts = research::run(ctx, &chapter).await;
        let degraded = (!facts.degraded.is_empty()).then(|| facts.degraded.join("; "));
        ctx.record_stage(
            &format!("{}.ch{}", Stage::Research, chapter.index),
            started,
            degraded.as_deref(),
        )
        .await;

        let chapter_digest = digest.for_chapter(chapter.index);
        let outcome = RevisionController::new(ctx)
            .run(&mut chapter, &facts, &chapter_digest)
            .await;
        match &outcome {
            ChapterOutcome::Approved => {}
            ChapterOutcome::Exhausted => {
                info!(job_id = %ctx.job_id, chapter = chapter.index, "chapter kept with best attempt")
            }
            ChapterOutcome::Failed(e) => {
                warn!(job_id = %ctx.job_id, chapter = chapter.index, kind = %e.kind(), error = %e, "chapter pipeline failed")
            }
        }

        self.finish_chapter(&chapter).await;
        chapter
    }

    async fn finish_chapter(&self, chapter: &Chapter) {
        self.save_chapter(chapter, false).await;
        if let Some(observer) = &self.observer {
            observer.chapter_finished(chapter);
        }
    }

    fn notify_stage(&self, stage: Stage, chapter: Option<&Chapter>) {
        if let Some(observer) = &self.observer {
            observer.stage_started(stage, chapter);
        }
    }

    fn transition(&self, job: &mut Job, apply: impl FnOnce(&mut Job) -> Result<(), StageError>) {
        if let Err(e) = apply(job) {
            warn!(job_id = %job.id, error = %e, "ignored invalid job transition");
        }
    }

    fn transition_chapter(&self, chapter: &mut Chapter, reason: String) {
        if chapter.status.is_terminal() {
            return;
        }
        if let Err(e) = ChapterMachine::fail(chapter, reason) {
            warn!(chapter = chapter.index, error = %e, "ignored invalid chapter transition");
        }
    }

    async fn save_job(&self, job: &Job, create: bool) {
        let record = job.record();
        let record = &record;
        let persistence = self.collaborators.persistence.as_ref();
        let saved = if create {
            self.policy
                .invoke("persistence.create_job", move || persistence.create_job(record))
                .await
        } else {
            self.policy
                .invoke("persistence.update_job", move || persistence.update_job(record))
                .await
        };
        if let Err(e) = saved {
            warn!(job_id = %job.id, status = %job.status, error = %e, "failed to persist job record");
        }
    }

    async fn save_chapter(&self, chapter: &Chapter, create: bool) {
        let record = chapter.record();
        let record = &record;
        let persistence = self.collaborators.persistence.as_ref();
        let saved = if create {
            self.policy
                .invoke("persistence.create_chapter", move || persistence.create_chapter(record))
                .await
        } else {
            self.policy
                .invoke("persistence.update_chapter", move || persistence.update_chapter(record))
                .await
        };
        if let Err(e) = saved {
            warn!(chapter = chapter.index, status = %chapter.status, error = %e, "failed to persist chapter record");
        }
    }
}

async fn record<T>(ctx: &JobContext, workflow: String, started: Instant, result: &Result<T, StageError>) {
    let error = result.as_ref().err().map(ToString::to_string);
    ctx.record_stage(&workflow, started, error.as_deref()).await;
}
