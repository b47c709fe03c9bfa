//! Interfaces to the external services the orchestrator drives.
//!
//! Every call made through these traits goes through
//! [`RetryPolicy::invoke`](crate::retry::RetryPolicy::invoke); implementations
//! report a single attempt's outcome as [`AttemptError`].

mod generative;
mod http;
mod null;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AttemptError;
use crate::model::{ChapterStatus, JobStatus};

pub use generative::AnthropicGenerator;
pub use http::{HttpPersistence, HttpRetrieval, HttpStandards};
pub use null::{MemoryPersistence, NullRetrieval, NullStandards};

/// What a generation call is for. Drives logging and lets fakes route responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationTask {
    Outline,
    Opener,
    Body,
    Closer,
    CodeExample,
    Review,
    Preface,
}

impl GenerationTask {
    pub fn label(&self) -> &'static str {
        match self {
            GenerationTask::Outline => "generate.outline",
            GenerationTask::Opener => "generate.opener",
            GenerationTask::Body => "generate.body",
            GenerationTask::Closer => "generate.closer",
            GenerationTask::CodeExample => "generate.code",
            GenerationTask::Review => "generate.review",
            GenerationTask::Preface => "generate.preface",
        }
    }
}

impl fmt::Display for GenerationTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub task: GenerationTask,
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Chat-style completion service.
#[async_trait]
pub trait GenerativeService: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, AttemptError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    /// Exact-match metadata filters.
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
    pub limit: usize,
    /// Hybrid (keyword + vector) when true, pure vector otherwise.
    #[serde(default)]
    pub hybrid: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub text: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl SearchHit {
    /// Source identifier taken from the `source` metadata key, if any.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(|v| v.as_str())
    }
}

/// Knowledge-base search.
#[async_trait]
pub trait RetrievalService: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, AttemptError>;
}

/// A syllabus section as returned by the standards service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub status: String,
    #[serde(default)]
    pub findings: Vec<String>,
    pub score: f64,
}

/// Syllabus lookup and compliance checking.
#[async_trait]
pub trait StandardsLookup: Send + Sync {
    /// `Ok(None)` when the domain id is unknown.
    async fn get_section(&self, domain_id: &str) -> Result<Option<Section>, AttemptError>;

    async fn validate(&self, content: &str) -> Result<ComplianceReport, AttemptError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub title: String,
    pub domain_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterRecord {
    pub id: String,
    pub job_id: String,
    pub index: usize,
    pub title: String,
    pub status: ChapterStatus,
    pub score: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Error,
}

/// One observability record per stage boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub job_id: String,
    pub workflow: String,
    pub status: LogStatus,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

/// CRUD store for jobs, chapters and log entries.
#[async_trait]
pub trait PersistenceApi: Send + Sync {
    async fn create_job(&self, job: &JobRecord) -> Result<(), AttemptError>;

    async fn update_job(&self, job: &JobRecord) -> Result<(), AttemptError>;

    /// `Ok(None)` on 404.
    async fn get_job(&self, id: &str) -> Result<Option<JobRecord>, AttemptError>;

    async fn create_chapter(&self, chapter: &ChapterRecord) -> Result<(), AttemptError>;

    async fn update_chapter(&self, chapter: &ChapterRecord) -> Result<(), AttemptError>;

    async fn log(&self, entry: &LogEntry) -> Result<(), AttemptError>;
}

/// The four collaborators a job run needs, shared across chapters.
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn GenerativeService>,
    pub retrieval: Arc<dyn RetrievalService>,
    pub standards: Arc<dyn StandardsLookup>,
    pub persistence: Arc<dyn PersistenceApi>,
}

impl Collaborators {
    /// Generator only; retrieval and standards are null and persistence is in-memory.
    pub fn with_generator(generator: Arc<dyn GenerativeService>) -> Self {
        Self {
            generator,
            retrieval: Arc::new(NullRetrieval),
            standards: Arc::new(NullStandards),
            persistence: Arc::new(MemoryPersistence::default()),
        }
    }
}
