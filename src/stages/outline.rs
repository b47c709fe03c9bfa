use std::collections::HashSet;

use serde::Deserialize;
use tracing::{debug, warn};

use super::author_system_prompt;
use crate::collaborators::{GenerationTask, Section};
use crate::content::Generated;
use crate::context::JobContext;
use crate::error::StageError;
use crate::model::{Chapter, JobSpec, LearningObjective};

#[derive(Debug, Deserialize)]
struct OutlineDoc {
    chapters: Vec<OutlineChapter>,
}

#[derive(Debug, Deserialize)]
struct OutlineChapter {
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    objectives: Vec<OutlineObjective>,
}

#[derive(Debug, Deserialize)]
struct OutlineObjective {
    #[serde(default)]
    id: Option<String>,
    description: String,
    #[serde(default = "default_level")]
    level: String,
}

fn default_level() -> String {
    "intermediate".to_string()
}

/// Produce the ordered chapter list. Runs once per job; any error is fatal to it.
pub async fn run(ctx: &JobContext) -> Result<Vec<Chapter>, StageError> {
    let spec = &ctx.spec;
    let syllabus = syllabus_context(ctx).await;

    let raw = ctx
        .generate(
            GenerationTask::Outline,
            author_system_prompt(spec),
            outline_prompt(spec, syllabus.as_ref()),
        )
        .await?;

    let doc = match Generated::<OutlineDoc>::parse(&raw) {
        Generated::Parsed(doc) => doc,
        Generated::Unparsed(raw) => {
            return Err(StageError::Rejected(format!(
                "outline output is not valid JSON ({} chars)",
                raw.len()
            )));
        }
    };

    let chapters = build_chapters(&ctx.job_id, spec, doc)?;
    debug!(job_id = %ctx.job_id, chapters = chapters.len(), "outline accepted");
    Ok(chapters)
}

// Syllabus context is optional: a missing or unreachable section only thins the prompt.
async fn syllabus_context(ctx: &JobContext) -> Option<Section> {
    let standards = ctx.collaborators.standards.as_ref();
    let domain_id = ctx.spec.domain_id.as_str();
    match ctx
        .policy
        .invoke("standards.section", move || standards.get_section(domain_id))
        .await
    {
        Ok(section) => section,
        Err(e) => {
            warn!(job_id = %ctx.job_id, error = %e, "syllabus lookup failed, outlining without it");
            None
        }
    }
}

fn outline_prompt(spec: &JobSpec, syllabus: Option<&Section>) -> String {
    let mut prompt = format!(
        "Plan a book titled \"{}\" for {}.\n\
         Produce at most {} chapters. Each chapter needs a title, a one-paragraph summary \
         and 2 to 5 measurable learning objectives with a level tag \
         (intro, intermediate or advanced).\n",
        spec.title, spec.audience, spec.chapter_count
    );
    if let Some(section) = syllabus {
        prompt.push_str(&format!(
            "\nThe book must follow syllabus section {} \"{}\".\n",
            section.id, section.title
        ));
        for objective in &section.objectives {
            prompt.push_str(&format!("- {objective}\n"));
        }
        if !section.body.is_empty() {
            prompt.push_str(&format!("\n{}\n", super::truncate(&section.body, 2000)));
        }
    }
    prompt.push_str(
        "\nRespond with ONLY valid JSON, no other text.\n\
         Format: {\"chapters\": [{\"title\": \"...\", \"summary\": \"...\", \
         \"objectives\": [{\"description\": \"...\", \"level\": \"intro\"}]}]}",
    );
    prompt
}

fn build_chapters(job_id: &str, spec: &JobSpec, doc: OutlineDoc) -> Result<Vec<Chapter>, StageError> {
    if doc.chapters.is_empty() {
        return Err(StageError::Validation("outline has no chapters".into()));
    }
    if doc.chapters.len() > spec.chapter_count as usize {
        return Err(StageError::Validation(format!(
            "outline has {} chapters, at most {} requested",
            doc.chapters.len(),
            spec.chapter_count
        )));
    }

    doc.chapters
        .into_iter()
        .enumerate()
        .map(|(i, raw)| {
            let index = i + 1;
            if raw.title.trim().is_empty() {
                return Err(StageError::Validation(format!("chapter {index} has no title")));
            }
            if raw.objectives.is_empty() {
                return Err(StageError::Validation(format!(
                    "chapter {index} \"{}\" has no learning objectives",
                    raw.title
                )));
            }

            let mut seen = HashSet::new();
            let objectives = raw
                .objectives
                .into_iter()
                .enumerate()
                .map(|(j, o)| {
                    if o.description.trim().is_empty() {
                        return Err(StageError::Validation(format!(
                            "objective {} of chapter {index} is empty",
                            j + 1
                        )));
                    }
                    let id = o
                        .id
                        .filter(|id| !id.trim().is_empty())
                        .unwrap_or_else(|| format!("{index}.{}", j + 1));
                    if !seen.insert(id.clone()) {
                        return Err(StageError::Validation(format!(
                            "duplicate objective id {id} in chapter {index}"
                        )));
                    }
                    Ok(LearningObjective {
                        id,
                        description: o.description.trim().to_string(),
                        level: o.level,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            Ok(Chapter::new(
                job_id,
                index,
                raw.title.trim().to_string(),
                raw.summary.trim().to_string(),
                objectives,
            ))
        })
        .collect()
}
