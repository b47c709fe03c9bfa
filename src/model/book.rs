use serde::{Deserialize, Serialize};

use super::chapter::{Chapter, ChapterStatus, DraftContent, LearningObjective};

/// One row of the per-chapter score table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRow {
    pub index: usize,
    pub title: String,
    pub status: ChapterStatus,
    pub score: Option<u32>,
    pub attempts: usize,
}

impl ScoreRow {
    pub fn from_chapter(chapter: &Chapter) -> Self {
        Self {
            index: chapter.index,
            title: chapter.title.clone(),
            status: chapter.status,
            score: chapter.score(),
            attempts: chapter.attempts.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledChapter {
    pub index: usize,
    pub title: String,
    pub status: ChapterStatus,
    pub score: Option<u32>,
    pub objectives: Vec<LearningObjective>,
    /// `None` when the chapter failed before any draft was reviewed.
    pub content: Option<DraftContent>,
    pub questions: Vec<String>,
    /// Set for chapters that did not reach approval.
    pub flagged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookStats {
    pub chapter_count: usize,
    pub approved: usize,
    pub failed: usize,
    /// Mean over chapters that have a score.
    pub average_score: Option<f64>,
    pub question_count: usize,
    pub scores: Vec<ScoreRow>,
}

impl BookStats {
    pub fn from_chapters(chapters: &[Chapter]) -> Self {
        let scores: Vec<ScoreRow> = chapters.iter().map(ScoreRow::from_chapter).collect();
        let scored: Vec<u32> = scores.iter().filter_map(|r| r.score).collect();
        let average_score = (!scored.is_empty())
            .then(|| scored.iter().map(|s| *s as f64).sum::<f64>() / scored.len() as f64);

        Self {
            chapter_count: chapters.len(),
            approved: count_status(chapters, ChapterStatus::Approved),
            failed: count_status(chapters, ChapterStatus::Failed),
            average_score,
            question_count: chapters
                .iter()
                .filter_map(|c| c.draft.as_ref())
                .map(|d| d.closer.questions.len())
                .sum(),
            scores,
        }
    }
}

fn count_status(chapters: &[Chapter], status: ChapterStatus) -> usize {
    chapters.iter().filter(|c| c.status == status).count()
}

/// The compiled book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookStructure {
    pub title: String,
    pub audience: String,
    pub preface: String,
    pub chapters: Vec<CompiledChapter>,
    pub stats: BookStats,
}
