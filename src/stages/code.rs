use serde::Deserialize;
use tracing::{debug, warn};

use crate::collaborators::{GenerationRequest, GenerationTask};
use crate::content::{Generated, strip_fences};
use crate::context::JobContext;
use crate::error::{CallError, StageError};
use crate::fanout::{self, Branch};
use crate::model::{ArtifactRequest, Chapter, CodeExample};

#[derive(Debug, Deserialize)]
struct CodeDoc {
    language: String,
    code: String,
    #[serde(default)]
    explanation: String,
}

/// Generate one code example per artifact request, all requests in parallel.
///
/// A rejected request is dropped from the output; a transient failure of any
/// branch fails the stage once every branch has finished.
pub async fn run(
    ctx: &JobContext,
    chapter: &Chapter,
    artifacts: &[ArtifactRequest],
) -> Result<Vec<CodeExample>, StageError> {
    if artifacts.is_empty() {
        return Ok(Vec::new());
    }

    let requests: Vec<GenerationRequest> = artifacts
        .iter()
        .map(|a| {
            ctx.request(
                GenerationTask::CodeExample,
                code_system_prompt(ctx),
                code_prompt(chapter, a),
            )
        })
        .collect();

    let generator = ctx.collaborators.generator.as_ref();
    let branches = requests
        .iter()
        .enumerate()
        .map(|(i, request)| {
            Branch::new(format!("code.example.{}", i + 1), move || {
                generator.generate(request)
            })
        })
        .collect();

    let mut examples = Vec::with_capacity(artifacts.len());
    let mut transient: Option<CallError> = None;
    for (artifact, result) in artifacts
        .iter()
        .zip(fanout::join_all(&ctx.policy, branches).await)
    {
        match result {
            Ok(raw) => examples.push(to_example(artifact, &raw)),
            Err(CallError::Rejected(reason)) => {
                warn!(
                    job_id = %ctx.job_id,
                    chapter = chapter.index,
                    objective = %artifact.objective_id,
                    %reason,
                    "code example rejected, skipping"
                );
            }
            Err(e) => {
                transient.get_or_insert(e);
            }
        }
    }

    if let Some(e) = transient {
        return Err(e.into());
    }
    debug!(job_id = %ctx.job_id, chapter = chapter.index, examples = examples.len(), "code examples ready");
    Ok(examples)
}

fn to_example(artifact: &ArtifactRequest, raw: &str) -> CodeExample {
    let (language, code, explanation) = match Generated::<CodeDoc>::parse(raw) {
        Generated::Parsed(doc) => (doc.language, doc.code, doc.explanation),
        Generated::Unparsed(raw) => ("text".to_string(), strip_fences(&raw).to_string(), String::new()),
    };
    CodeExample {
        objective_id: artifact.objective_id.clone(),
        request: artifact.description.clone(),
        language,
        code,
        explanation,
    }
}

fn code_system_prompt(ctx: &JobContext) -> String {
    format!(
        "You write short, correct, runnable code examples for the book \"{}\" aimed at {}.",
        ctx.spec.title, ctx.spec.audience
    )
}

fn code_prompt(chapter: &Chapter, artifact: &ArtifactRequest) -> String {
    let objective = chapter
        .objectives
        .iter()
        .find(|o| o.id == artifact.objective_id)
        .map(|o| o.description.as_str())
        .unwrap_or_default();
    format!(
        "Chapter {} \"{}\", objective: {}.\n\
         Write a code example showing: {}.\n\
         Respond with ONLY valid JSON, no other text.\n\
         Format: {{\"language\": \"...\", \"code\": \"...\", \"explanation\": \"...\"}}",
        chapter.index, chapter.title, objective, artifact.description
    )
}
