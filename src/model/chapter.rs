use std::fmt;

use serde::{Deserialize, Serialize};

use crate::collaborators::{ChapterRecord, SearchHit, Section};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningObjective {
    pub id: String,
    pub description: String,
    /// Difficulty tag, e.g. "intro", "intermediate", "advanced".
    pub level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChapterStatus {
    Queued,
    Researching,
    Drafting,
    Reviewing,
    Approved,
    Failed,
}

impl ChapterStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChapterStatus::Approved | ChapterStatus::Failed)
    }
}

impl fmt::Display for ChapterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChapterStatus::Queued => "queued",
            ChapterStatus::Researching => "researching",
            ChapterStatus::Drafting => "drafting",
            ChapterStatus::Reviewing => "reviewing",
            ChapterStatus::Approved => "approved",
            ChapterStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodySection {
    pub objective_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Closer {
    pub synthesis: String,
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default)]
    pub exercise: String,
}

/// A "needs external artifact" marker pulled out of a body section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRequest {
    pub objective_id: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeExample {
    pub objective_id: String,
    pub request: String,
    pub language: String,
    pub code: String,
    #[serde(default)]
    pub explanation: String,
}

/// A complete draft: opener, one section per objective in objective order, closer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftContent {
    pub opener: String,
    pub sections: Vec<BodySection>,
    pub closer: Closer,
    #[serde(default)]
    pub code_examples: Vec<CodeExample>,
}

impl DraftContent {
    /// Markdown rendering used for review and compliance checks.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.opener);
        out.push_str("\n\n");
        for section in &self.sections {
            out.push_str(&section.text);
            out.push_str("\n\n");
            for example in self
                .code_examples
                .iter()
                .filter(|e| e.objective_id == section.objective_id)
            {
                out.push_str(&format!("```{}\n{}\n```\n\n", example.language, example.code));
            }
        }
        out.push_str(&self.closer.synthesis);
        if !self.closer.questions.is_empty() {
            out.push_str("\n\n## Review Questions\n");
            for (i, q) in self.closer.questions.iter().enumerate() {
                out.push_str(&format!("{}. {}\n", i + 1, q));
            }
        }
        if !self.closer.exercise.is_empty() {
            out.push_str("\n## Practice Exercise\n");
            out.push_str(&self.closer.exercise);
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    NeedsRevision,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    /// 0 to 100.
    pub score: u32,
    pub verdict: Verdict,
    pub coverage_gaps: Vec<String>,
    /// Topics the draft covers that the objectives do not ask for.
    pub out_of_scope: Vec<String>,
    pub feedback: Vec<String>,
}

impl ReviewVerdict {
    pub fn is_approved(&self) -> bool {
        self.verdict == Verdict::Approved
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionAttempt {
    /// 1-based.
    pub number: u32,
    pub draft: DraftContent,
    pub verdict: ReviewVerdict,
}

/// Compact view of one attempt, as reported per chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionEntry {
    pub feedback: Vec<String>,
    pub score: u32,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveEvidence {
    pub objective_id: String,
    pub passages: Vec<SearchHit>,
}

/// Research output for one chapter. Possibly empty when retrieval was down.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactSheet {
    pub summary: String,
    pub syllabus: Option<Section>,
    pub evidence: Vec<ObjectiveEvidence>,
    pub sources: Vec<String>,
    /// Lookups that failed and were skipped.
    pub degraded: Vec<String>,
}

impl FactSheet {
    pub fn is_empty(&self) -> bool {
        self.summary.is_empty()
            && self.syllabus.is_none()
            && self.evidence.iter().all(|e| e.passages.is_empty())
    }

    pub fn evidence_for(&self, objective_id: &str) -> &[SearchHit] {
        self.evidence
            .iter()
            .find(|e| e.objective_id == objective_id)
            .map(|e| e.passages.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub job_id: String,
    /// 1-based position in the book.
    pub index: usize,
    pub title: String,
    pub summary: String,
    pub objectives: Vec<LearningObjective>,
    /// Approved draft, or the best attempt once revisions are exhausted.
    pub draft: Option<DraftContent>,
    pub attempts: Vec<RevisionAttempt>,
    pub status: ChapterStatus,
    pub status_history: Vec<ChapterStatus>,
    pub error: Option<String>,
}

impl Chapter {
    pub fn new(
        job_id: &str,
        index: usize,
        title: String,
        summary: String,
        objectives: Vec<LearningObjective>,
    ) -> Self {
        Self {
            id: format!("{job_id}-ch{index}"),
            job_id: job_id.to_string(),
            index,
            title,
            summary,
            objectives,
            draft: None,
            attempts: Vec::new(),
            status: ChapterStatus::Queued,
            status_history: Vec::new(),
            error: None,
        }
    }

    pub fn revision_history(&self) -> Vec<RevisionEntry> {
        self.attempts
            .iter()
            .map(|a| RevisionEntry {
                feedback: a.verdict.feedback.clone(),
                score: a.verdict.score,
                verdict: a.verdict.verdict,
            })
            .collect()
    }

    /// Highest-scoring attempt; the earliest wins a tie.
    pub fn best_attempt(&self) -> Option<&RevisionAttempt> {
        self.attempts
            .iter()
            .fold(None, |best: Option<&RevisionAttempt>, a| match best {
                Some(b) if b.verdict.score >= a.verdict.score => Some(b),
                _ => Some(a),
            })
    }

    pub fn latest_attempt(&self) -> Option<&RevisionAttempt> {
        self.attempts.last()
    }

    pub fn score(&self) -> Option<u32> {
        match self.status {
            ChapterStatus::Approved => self.latest_attempt().map(|a| a.verdict.score),
            _ => self.best_attempt().map(|a| a.verdict.score),
        }
    }

    pub fn record(&self) -> ChapterRecord {
        ChapterRecord {
            id: self.id.clone(),
            job_id: self.job_id.clone(),
            index: self.index,
            title: self.title.clone(),
            status: self.status,
            score: self.score(),
        }
    }
}

/// Read-only view of the whole outline handed to every chapter, so each one
/// knows what its neighbours cover.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryDigest {
    entries: Vec<DigestEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DigestEntry {
    index: usize,
    title: String,
    objectives: Vec<String>,
}

impl HistoryDigest {
    pub fn from_chapters(chapters: &[Chapter]) -> Self {
        Self {
            entries: chapters
                .iter()
                .map(|c| DigestEntry {
                    index: c.index,
                    title: c.title.clone(),
                    objectives: c.objectives.iter().map(|o| o.description.clone()).collect(),
                })
                .collect(),
        }
    }

    /// Prior chapters with their objectives, then the next chapter's title.
    pub fn for_chapter(&self, index: usize) -> String {
        let mut out = String::new();
        for entry in self.entries.iter().filter(|e| e.index < index) {
            out.push_str(&format!(
                "Chapter {} \"{}\" covered: {}\n",
                entry.index,
                entry.title,
                entry.objectives.join("; ")
            ));
        }
        if let Some(next) = self.entries.iter().find(|e| e.index == index + 1) {
            out.push_str(&format!(
                "Chapter {} \"{}\" comes next.\n",
                next.index, next.title
            ));
        }
        if out.is_empty() {
            out.push_str("This is the only chapter so far.\n");
        }
        out
    }
}
