//! Per-job execution context.
//!
//! One [`JobContext`] exists per `run_job` call and is passed to every stage.
//! It owns the job's accumulator arena, so nothing is shared between jobs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::warn;

use crate::accumulator::AccumulatorStore;
use crate::collaborators::{Collaborators, GenerationRequest, GenerationTask, LogEntry, LogStatus};
use crate::config::BookforgeConfig;
use crate::error::{CallError, StageError};
use crate::model::JobSpec;
use crate::retry::RetryPolicy;

/// Pipeline knobs resolved from configuration.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_revisions: u32,
    pub approval_threshold: u32,
    pub coverage_threshold: f64,
    pub chapter_concurrency: usize,
    pub job_timeout: Duration,
    pub include_code: bool,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&BookforgeConfig::default())
    }
}

impl From<&BookforgeConfig> for PipelineSettings {
    fn from(config: &BookforgeConfig) -> Self {
        Self {
            max_revisions: config.pipeline.max_revisions,
            approval_threshold: config.pipeline.approval_threshold,
            coverage_threshold: config.pipeline.coverage_threshold,
            chapter_concurrency: config.pipeline.chapter_concurrency,
            job_timeout: config.job_timeout(),
            include_code: config.pipeline.include_code,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

impl PipelineSettings {
    /// Review and outline run cooler than prose generation.
    pub fn temperature_for(&self, task: GenerationTask) -> f32 {
        match task {
            GenerationTask::Review => 0.2,
            GenerationTask::Outline | GenerationTask::CodeExample => 0.4,
            _ => self.temperature,
        }
    }
}

/// Cooperative cancellation flag shared between the caller and a running job.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct JobContext {
    pub job_id: String,
    pub spec: JobSpec,
    pub collaborators: Collaborators,
    pub policy: RetryPolicy,
    pub settings: PipelineSettings,
    pub accumulators: AccumulatorStore,
    cancel: CancellationToken,
    deadline: Instant,
}

impl JobContext {
    pub fn new(
        job_id: String,
        spec: JobSpec,
        collaborators: Collaborators,
        policy: RetryPolicy,
        settings: PipelineSettings,
        cancel: CancellationToken,
    ) -> Self {
        let deadline = Instant::now() + settings.job_timeout;
        Self {
            job_id,
            spec,
            collaborators,
            policy,
            settings,
            accumulators: AccumulatorStore::new(),
            cancel,
            deadline,
        }
    }

    /// Called between stage steps. Never interrupts a step in progress.
    pub fn check_continue(&self) -> Result<(), StageError> {
        if self.cancel.is_cancelled() {
            return Err(StageError::Cancelled("job cancelled".into()));
        }
        if Instant::now() >= self.deadline {
            return Err(StageError::Cancelled(format!(
                "job timed out after {}s",
                self.settings.job_timeout.as_secs()
            )));
        }
        Ok(())
    }

    pub fn include_code(&self) -> bool {
        self.spec.include_code.unwrap_or(self.settings.include_code)
    }

    pub fn request(&self, task: GenerationTask, system: String, user: String) -> GenerationRequest {
        GenerationRequest {
            task,
            system,
            user,
            temperature: self.settings.temperature_for(task),
            max_tokens: self.settings.max_tokens,
        }
    }

    /// One generation call through the retry executor.
    pub async fn generate(
        &self,
        task: GenerationTask,
        system: String,
        user: String,
    ) -> Result<String, CallError> {
        let request = self.request(task, system, user);
        let request = &request;
        let generator = self.collaborators.generator.as_ref();
        self.policy
            .invoke(task.label(), move || generator.generate(request))
            .await
    }

    /// Emit a stage-boundary log entry. Failures here are only logged.
    pub async fn record_stage(&self, workflow: &str, started: Instant, error: Option<&str>) {
        let entry = LogEntry {
            job_id: self.job_id.clone(),
            workflow: workflow.to_string(),
            status: if error.is_some() {
                LogStatus::Error
            } else {
                LogStatus::Success
            },
            duration_ms: started.elapsed().as_millis() as u64,
            error: error.map(str::to_string),
            at: Utc::now(),
        };
        let entry = &entry;
        let persistence = self.collaborators.persistence.as_ref();
        if let Err(e) = self
            .policy
            .invoke("persistence.log", move || persistence.log(entry))
            .await
        {
            warn!(job_id = %self.job_id, workflow, error = %e, "failed to write log entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{GenerativeService, MemoryPersistence};
    use crate::error::AttemptError;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl GenerativeService for Echo {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, AttemptError> {
            Ok(format!("{}|{}", request.task, request.temperature))
        }
    }

    fn context(settings: PipelineSettings, cancel: CancellationToken) -> JobContext {
        JobContext::new(
            "job-1".into(),
            JobSpec::new("T", "D", "A"),
            Collaborators::with_generator(Arc::new(Echo)),
            RetryPolicy::default(),
            settings,
            cancel,
        )
    }

    #[tokio::test]
    async fn generate_uses_task_temperature() {
        let ctx = context(PipelineSettings::default(), CancellationToken::new());
        let out = ctx
            .generate(GenerationTask::Review, String::new(), String::new())
            .await
            .unwrap();
        assert_eq!(out, "generate.review|0.2");
    }

    #[test]
    fn cancellation_is_observed() {
        let token = CancellationToken::new();
        let ctx = context(PipelineSettings::default(), token.clone());
        assert!(ctx.check_continue().is_ok());
        token.cancel();
        assert!(matches!(ctx.check_continue(), Err(StageError::Cancelled(_))));
    }

    #[test]
    fn elapsed_deadline_stops_the_job() {
        let settings = PipelineSettings {
            job_timeout: Duration::ZERO,
            ..PipelineSettings::default()
        };
        let ctx = context(settings, CancellationToken::new());
        let err = ctx.check_continue().unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn spec_overrides_code_setting() {
        let mut ctx = context(PipelineSettings::default(), CancellationToken::new());
        assert!(ctx.include_code());
        ctx.spec.include_code = Some(false);
        assert!(!ctx.include_code());
    }

    #[tokio::test]
    async fn record_stage_writes_log_entry() {
        let persistence = Arc::new(MemoryPersistence::default());
        let mut collaborators = Collaborators::with_generator(Arc::new(Echo));
        collaborators.persistence = persistence.clone();
        let ctx = JobContext::new(
            "job-1".into(),
            JobSpec::new("T", "D", "A"),
            collaborators,
            RetryPolicy::default(),
            PipelineSettings::default(),
            CancellationToken::new(),
        );

        ctx.record_stage("outline", Instant::now(), Some("boom")).await;
        let logs = persistence.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].workflow, "outline");
        assert_eq!(logs[0].status, LogStatus::Error);
        assert_eq!(logs[0].error.as_deref(), Some("boom"));
    }
}
