#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bookforge::collaborators::{
    Collaborators, GenerationRequest, GenerationTask, GenerativeService, MemoryPersistence,
    RetrievalService, SearchHit, SearchQuery,
};
use bookforge::context::PipelineSettings;
use bookforge::error::AttemptError;
use bookforge::retry::RetryPolicy;
use bookforge::{CancellationToken, JobOrchestrator, JobSpec};

/// Generator that writes a predictable book.
///
/// The outline has `chapters` chapters with `objectives` objectives each.
/// Review scores are consumed in order across all review calls; the last
/// score repeats once the list runs out.
pub struct BookScript {
    chapters: usize,
    objectives: usize,
    scores: Vec<u32>,
    reviews: AtomicU32,
    cancel_on_review: Option<CancellationToken>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl BookScript {
    pub fn new(chapters: usize, objectives: usize, scores: Vec<u32>) -> Self {
        Self {
            chapters,
            objectives,
            scores,
            reviews: AtomicU32::new(0),
            cancel_on_review: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Cancel `token` as soon as the first review is requested.
    pub fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_on_review = Some(token);
        self
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn review_count(&self) -> u32 {
        self.reviews.load(Ordering::SeqCst)
    }

    fn outline(&self) -> String {
        let chapters: Vec<serde_json::Value> = (1..=self.chapters)
            .map(|c| {
                let objectives: Vec<serde_json::Value> = (1..=self.objectives)
                    .map(|o| {
                        serde_json::json!({
                            "description": format!("Apply technique {o} of topic {c}"),
                            "level": "intro"
                        })
                    })
                    .collect();
                serde_json::json!({
                    "title": format!("Topic {c}"),
                    "summary": format!("Everything about topic {c}."),
                    "objectives": objectives
                })
            })
            .collect();
        serde_json::json!({ "chapters": chapters }).to_string()
    }

    fn review(&self) -> String {
        if let Some(token) = &self.cancel_on_review {
            token.cancel();
        }
        let n = self.reviews.fetch_add(1, Ordering::SeqCst) as usize;
        let score = self.scores[n.min(self.scores.len() - 1)];
        format!(r#"{{"score": {score}, "required_changes": ["review {} change"], "feedback": "ok"}}"#, n + 1)
    }
}

#[async_trait]
impl GenerativeService for BookScript {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, AttemptError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(match request.task {
            GenerationTask::Outline => self.outline(),
            GenerationTask::Opener => "# Opening".to_string(),
            GenerationTask::Body => {
                // The first prompt line names the objective being written.
                let line = request.user.lines().next().unwrap_or_default();
                format!("## Section\n{line}")
            }
            GenerationTask::Closer => {
                r#"{"synthesis": "Summary.", "questions": ["Q?"], "exercise": "Try it."}"#.to_string()
            }
            GenerationTask::CodeExample => {
                r#"{"language": "rust", "code": "fn main() {}"}"#.to_string()
            }
            GenerationTask::Review => self.review(),
            GenerationTask::Preface => "A short preface.".to_string(),
        })
    }
}

/// Retrieval that never answers within the call timeout.
#[derive(Default)]
pub struct StalledRetrieval {
    pub calls: AtomicU32,
}

#[async_trait]
impl RetrievalService for StalledRetrieval {
    async fn search(&self, _query: &SearchQuery) -> Result<Vec<SearchHit>, AttemptError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(Vec::new())
    }
}

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        backoff: Duration::from_millis(1),
        call_timeout: Duration::from_millis(30),
    }
}

pub fn settings(max_revisions: u32) -> PipelineSettings {
    PipelineSettings {
        max_revisions,
        ..PipelineSettings::default()
    }
}

pub fn spec(chapter_count: u32) -> JobSpec {
    JobSpec {
        chapter_count,
        ..JobSpec::new("Practical Rust", "RUST-101", "working programmers")
    }
}

pub struct Harness {
    pub orchestrator: JobOrchestrator,
    pub persistence: Arc<MemoryPersistence>,
}

pub fn harness(generator: Arc<BookScript>, max_revisions: u32) -> Harness {
    harness_with(Collaborators::with_generator(generator), max_revisions)
}

pub fn harness_with(mut collaborators: Collaborators, max_revisions: u32) -> Harness {
    let persistence = Arc::new(MemoryPersistence::default());
    collaborators.persistence = persistence.clone();
    Harness {
        orchestrator: JobOrchestrator::new(collaborators, fast_policy(), settings(max_revisions)),
        persistence,
    }
}
