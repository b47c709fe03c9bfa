//! Pipeline stage executors, in pipeline order.
//!
//! Each stage reads a slice of job state plus the collaborators held by the
//! [`JobContext`](crate::context::JobContext) and returns either its output or
//! a [`StageError`](crate::error::StageError). Only Research swallows
//! collaborator failures; every other stage reports them.

pub mod code;
pub mod compile;
pub mod draft;
pub mod outline;
pub mod research;
pub mod review;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::JobSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Outline,
    Research,
    Draft,
    Code,
    Review,
    Compile,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Outline => "outline",
            Stage::Research => "research",
            Stage::Draft => "draft",
            Stage::Code => "code",
            Stage::Review => "review",
            Stage::Compile => "compile",
        };
        f.write_str(s)
    }
}

/// Shared author persona for every prose-producing call.
pub(crate) fn author_system_prompt(spec: &JobSpec) -> String {
    format!(
        "You are an expert technical author writing the book \"{}\" for {}. \
         Write in language code \"{}\". {}",
        spec.title,
        spec.audience,
        spec.language,
        spec.strategy.guidance()
    )
}

/// Cut `text` to at most `max` characters on a char boundary.
pub(crate) fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
