mod book;
mod chapter;
mod job;

pub use book::{BookStats, BookStructure, CompiledChapter, ScoreRow};
pub use chapter::{
    ArtifactRequest, BodySection, Chapter, ChapterStatus, Closer, CodeExample, DraftContent,
    FactSheet, HistoryDigest, LearningObjective, ObjectiveEvidence, ReviewVerdict,
    RevisionAttempt, RevisionEntry, Verdict,
};
pub use job::{GenerationStrategy, Job, JobResult, JobSpec, JobStatus, MAX_CHAPTERS};
