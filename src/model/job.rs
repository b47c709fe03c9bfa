use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::book::{BookStructure, ScoreRow};
use super::chapter::Chapter;
use crate::collaborators::JobRecord;
use crate::error::{PipelineError, StageError};

pub const MAX_CHAPTERS: u32 = 40;

/// How much material the outline and drafts should aim for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStrategy {
    Concise,
    #[default]
    Standard,
    Comprehensive,
}

impl GenerationStrategy {
    pub fn guidance(&self) -> &'static str {
        match self {
            GenerationStrategy::Concise => "Keep every section short and focused on essentials.",
            GenerationStrategy::Standard => "Balance explanation with worked examples.",
            GenerationStrategy::Comprehensive => {
                "Go deep: cover edge cases, history and several worked examples."
            }
        }
    }
}

/// What the caller asks for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub title: String,
    /// Syllabus identifier used for standards lookup and retrieval filters.
    pub domain_id: String,
    pub audience: String,
    #[serde(default)]
    pub strategy: GenerationStrategy,
    #[serde(default = "default_chapter_count")]
    pub chapter_count: u32,
    /// Overrides the configured default when set.
    #[serde(default)]
    pub include_code: Option<bool>,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_chapter_count() -> u32 {
    5
}

fn default_language() -> String {
    "en".to_string()
}

impl JobSpec {
    pub fn new(title: impl Into<String>, domain_id: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            domain_id: domain_id.into(),
            audience: audience.into(),
            strategy: GenerationStrategy::default(),
            chapter_count: default_chapter_count(),
            include_code: None,
            language: default_language(),
        }
    }

    /// Read a spec from a `.toml` or `.json` file.
    pub fn from_path(path: &Path) -> Result<Self, PipelineError> {
        let contents = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(toml::from_str(&contents)?)
        }
    }

    pub fn validate(&self) -> Result<(), StageError> {
        for (field, value) in [
            ("title", &self.title),
            ("domain_id", &self.domain_id),
            ("audience", &self.audience),
        ] {
            if value.trim().is_empty() {
                return Err(StageError::Validation(format!("{field} must not be empty")));
            }
        }
        if self.chapter_count == 0 || self.chapter_count > MAX_CHAPTERS {
            return Err(StageError::Validation(format!(
                "chapter_count must be within 1..={MAX_CHAPTERS}, got {}",
                self.chapter_count
            )));
        }
        Ok(())
    }
}

/// Tracks the lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One book-generation run. Mutated only by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub spec: JobSpec,
    pub status: JobStatus,
    pub status_history: Vec<JobStatus>,
    /// Chapter ids in book order, filled in after the outline.
    pub chapters: Vec<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(spec: JobSpec) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            spec,
            status: JobStatus::Pending,
            status_history: Vec::new(),
            chapters: Vec::new(),
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn record(&self) -> JobRecord {
        JobRecord {
            id: self.id.clone(),
            title: self.spec.title.clone(),
            domain_id: self.spec.domain_id.clone(),
            status: self.status,
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }
}

/// What `run_job` hands back. Always carries per-chapter status and score,
/// even when the job failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub status: JobStatus,
    pub status_history: Vec<JobStatus>,
    pub book: Option<BookStructure>,
    pub scores: Vec<ScoreRow>,
    pub chapters: Vec<Chapter>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl JobResult {
    pub fn from_job(job: &Job, chapters: Vec<Chapter>, book: Option<BookStructure>) -> Self {
        let now = job.completed_at.unwrap_or_else(Utc::now);
        let mut history = job.status_history.clone();
        history.push(job.status);

        Self {
            job_id: job.id.clone(),
            status: job.status,
            status_history: history,
            scores: chapters.iter().map(ScoreRow::from_chapter).collect(),
            book,
            chapters,
            error: job.error.clone(),
            started_at: job.created_at,
            completed_at: now,
            duration_ms: (now - job.created_at).num_milliseconds(),
        }
    }

    pub fn chapter(&self, index: usize) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.index == index)
    }
}
