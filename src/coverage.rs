//! Textual coverage of learning objectives.
//!
//! This is a cheap keyword heuristic, not semantic matching. Each objective's
//! description is reduced to keywords (three characters or more, stop-words
//! removed); the objective counts as covered when at least `threshold` of its
//! keywords occur somewhere in the content, case-insensitively.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::LearningObjective;

const MIN_KEYWORD_LEN: usize = 3;

const STOP_WORDS: &[&str] = &[
    "about", "after", "all", "also", "and", "any", "are", "been", "before", "being", "between",
    "both", "but", "can", "could", "did", "does", "each", "for", "from", "had", "has", "have",
    "how", "into", "its", "may", "more", "most", "not", "off", "once", "only", "other", "our",
    "out", "over", "own", "same", "should", "some", "such", "than", "that", "the", "their",
    "them", "then", "there", "these", "they", "this", "those", "through", "under", "until",
    "use", "using", "very", "was", "were", "what", "when", "where", "which", "while", "who",
    "why", "will", "with", "would", "you", "your", "able", "understand", "learn", "learner",
    "student", "students", "explain", "describe", "identify",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    /// Objective id → covered.
    pub per_objective: BTreeMap<String, bool>,
    /// Share of covered objectives, 0.0 to 100.0.
    pub percent: f64,
    pub all_covered: bool,
}

impl CoverageReport {
    /// Ids of uncovered objectives, in id order.
    pub fn uncovered(&self) -> Vec<&str> {
        self.per_objective
            .iter()
            .filter(|(_, covered)| !**covered)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CoverageValidator {
    threshold: f64,
}

impl Default for CoverageValidator {
    fn default() -> Self {
        Self { threshold: 0.5 }
    }
}

impl CoverageValidator {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn coverage(&self, objectives: &[LearningObjective], content: &str) -> CoverageReport {
        let haystack = content.to_lowercase();
        let per_objective: BTreeMap<String, bool> = objectives
            .iter()
            .map(|o| (o.id.clone(), self.is_covered(&o.description, &haystack)))
            .collect();

        let covered = per_objective.values().filter(|c| **c).count();
        let percent = if per_objective.is_empty() {
            100.0
        } else {
            covered as f64 * 100.0 / per_objective.len() as f64
        };

        CoverageReport {
            all_covered: covered == per_objective.len(),
            per_objective,
            percent,
        }
    }

    // An objective without usable keywords has nothing left to check.
    fn is_covered(&self, description: &str, haystack: &str) -> bool {
        let words = keywords(description);
        if words.is_empty() {
            return true;
        }
        let hits = words.iter().filter(|w| haystack.contains(w.as_str())).count();
        hits as f64 / words.len() as f64 >= self.threshold
    }
}

/// Lowercased, de-duplicated keywords in first-seen order.
pub fn keywords(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
    {
        if word.chars().count() >= MIN_KEYWORD_LEN
            && !STOP_WORDS.contains(&word.as_str())
            && !out.contains(&word)
        {
            out.push(word);
        }
    }
    out
}
