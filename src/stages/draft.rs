use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::{author_system_prompt, truncate};
use crate::accumulator::keys;
use crate::collaborators::GenerationTask;
use crate::content::Generated;
use crate::context::JobContext;
use crate::error::StageError;
use crate::model::{
    ArtifactRequest, BodySection, Chapter, Closer, DraftContent, FactSheet, LearningObjective,
    RevisionAttempt,
};

const ARTIFACT_OPEN: &str = "[[CODE:";
const ARTIFACT_CLOSE: &str = "]]";

/// What the previous attempt's review asked for, handed to the next draft.
#[derive(Debug, Clone, PartialEq)]
pub struct RevisionContext {
    /// Attempt number being drafted now.
    pub attempt: u32,
    pub feedback: Vec<String>,
    pub coverage_gaps: Vec<String>,
    pub out_of_scope: Vec<String>,
    pub previous: DraftContent,
}

impl RevisionContext {
    pub fn from_rejected(rejected: &RevisionAttempt) -> Self {
        Self {
            attempt: rejected.number + 1,
            feedback: rejected.verdict.feedback.clone(),
            coverage_gaps: rejected.verdict.coverage_gaps.clone(),
            out_of_scope: rejected.verdict.out_of_scope.clone(),
            previous: rejected.draft.clone(),
        }
    }

    fn instructions(&self) -> String {
        let mut out = format!(
            "\nThis is revision attempt {}. The previous draft was rejected by review.\n",
            self.attempt
        );
        push_list(&mut out, "Required changes", &self.feedback);
        push_list(&mut out, "Objectives not yet covered", &self.coverage_gaps);
        push_list(&mut out, "Remove these out-of-scope topics", &self.out_of_scope);
        out
    }

    fn previous_section(&self, objective_id: &str) -> Option<&str> {
        self.previous
            .sections
            .iter()
            .find(|s| s.objective_id == objective_id)
            .map(|s| s.text.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DraftOutput {
    pub content: DraftContent,
    pub artifacts: Vec<ArtifactRequest>,
}

/// Inputs shared by every prompt of one draft.
struct DraftInputs<'a> {
    chapter: &'a Chapter,
    facts: &'a FactSheet,
    digest: &'a str,
    revision: Option<&'a RevisionContext>,
}

/// Draft one chapter: opener, one body section per objective in order, closer.
///
/// Intermediate parts live in the job's accumulator arena under the chapter's
/// slot; the slot is closed before returning on every path.
pub async fn run(
    ctx: &JobContext,
    chapter: &Chapter,
    facts: &FactSheet,
    digest: &str,
    revision: Option<&RevisionContext>,
) -> Result<DraftOutput, StageError> {
    let inputs = DraftInputs {
        chapter,
        facts,
        digest,
        revision,
    };
    let system = author_system_prompt(&ctx.spec);
    let scratch = ctx.accumulators.scoped(&ctx.job_id, &chapter.id)?;

    let opener = ctx
        .generate(GenerationTask::Opener, system.clone(), opener_prompt(&inputs))
        .await?;
    scratch.append(keys::DRAFT, opener.trim())?;

    for objective in &chapter.objectives {
        let so_far = scratch.read_text(keys::DRAFT)?;
        let raw = ctx
            .generate(
                GenerationTask::Body,
                system.clone(),
                body_prompt(&inputs, objective, &so_far),
            )
            .await?;

        let (text, artifacts) = extract_artifacts(&raw, &objective.id);
        scratch.append(keys::DRAFT, text.as_str())?;
        scratch.append(
            keys::SECTIONS,
            to_value(&BodySection {
                objective_id: objective.id.clone(),
                text,
            })?,
        )?;
        for artifact in &artifacts {
            scratch.append(keys::ARTIFACTS, to_value(artifact)?)?;
        }
    }

    let so_far = scratch.read_text(keys::DRAFT)?;
    let raw = ctx
        .generate(GenerationTask::Closer, system, closer_prompt(&inputs, &so_far))
        .await?;
    let closer = Generated::<Closer>::parse(&raw).resolve(|raw| Closer {
        synthesis: raw.trim().to_string(),
        ..Closer::default()
    });

    let opener = scratch
        .read(keys::DRAFT)?
        .and_then(|parts| parts.first().and_then(Value::as_str).map(str::to_string))
        .unwrap_or_default();
    let sections: Vec<BodySection> = from_values(scratch.read(keys::SECTIONS)?)?;
    let artifacts: Vec<ArtifactRequest> = from_values(scratch.read(keys::ARTIFACTS)?)?;
    scratch.close();

    if sections.len() != chapter.objectives.len() {
        return Err(StageError::Validation(format!(
            "draft has {} sections for {} objectives",
            sections.len(),
            chapter.objectives.len()
        )));
    }

    debug!(
        job_id = %ctx.job_id,
        chapter = chapter.index,
        sections = sections.len(),
        artifacts = artifacts.len(),
        "draft assembled"
    );
    Ok(DraftOutput {
        content: DraftContent {
            opener,
            sections,
            closer,
            code_examples: Vec::new(),
        },
        artifacts,
    })
}

/// Pull `[[CODE: ...]]` markers out of a body section.
///
/// Returns the section text with the markers removed and one request per
/// marker, in order. An unterminated marker is left in the text.
pub fn extract_artifacts(raw: &str, objective_id: &str) -> (String, Vec<ArtifactRequest>) {
    let mut text = String::with_capacity(raw.len());
    let mut artifacts = Vec::new();
    let mut rest = raw;

    while let Some(start) = rest.find(ARTIFACT_OPEN) {
        let after = &rest[start + ARTIFACT_OPEN.len()..];
        let Some(end) = after.find(ARTIFACT_CLOSE) else {
            break;
        };
        text.push_str(&rest[..start]);
        let description = after[..end].trim();
        if !description.is_empty() {
            artifacts.push(ArtifactRequest {
                objective_id: objective_id.to_string(),
                description: description.to_string(),
            });
        }
        rest = &after[end + ARTIFACT_CLOSE.len()..];
    }
    text.push_str(rest);

    let cleaned = text
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    (cleaned.trim().to_string(), artifacts)
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, StageError> {
    serde_json::to_value(value).map_err(|e| StageError::Validation(e.to_string()))
}

fn from_values<T: DeserializeOwned>(values: Option<Vec<Value>>) -> Result<Vec<T>, StageError> {
    values
        .unwrap_or_default()
        .into_iter()
        .map(|v| serde_json::from_value(v).map_err(|e| StageError::Validation(e.to_string())))
        .collect()
}

fn push_list(out: &mut String, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push_str(heading);
    out.push_str(":\n");
    for item in items {
        out.push_str(&format!("- {item}\n"));
    }
}

fn objectives_list(objectives: &[LearningObjective]) -> String {
    objectives
        .iter()
        .map(|o| format!("- [{}] {} ({})", o.id, o.description, o.level))
        .collect::<Vec<_>>()
        .join("\n")
}

fn opener_prompt(inputs: &DraftInputs<'_>) -> String {
    let chapter = inputs.chapter;
    let mut prompt = format!(
        "Write the opening of chapter {} \"{}\".\n{}\n\n\
         Learning objectives:\n{}\n\n\
         Where this chapter sits in the book:\n{}\n",
        chapter.index,
        chapter.title,
        chapter.summary,
        objectives_list(&chapter.objectives),
        inputs.digest
    );
    if !inputs.facts.summary.is_empty() {
        prompt.push_str(&format!("\nBackground:\n{}\n", inputs.facts.summary));
    }
    if let Some(revision) = inputs.revision {
        prompt.push_str(&revision.instructions());
        prompt.push_str(&format!(
            "\nPrevious opening:\n{}\n",
            truncate(&revision.previous.opener, 1500)
        ));
    }
    prompt.push_str(
        "\nMotivate the topic with a concrete scenario and state what the reader will be able \
         to do. Respond with the opening text only, in Markdown, starting with the chapter heading.",
    );
    prompt
}

fn body_prompt(inputs: &DraftInputs<'_>, objective: &LearningObjective, so_far: &str) -> String {
    let mut prompt = format!(
        "Continue chapter {} \"{}\" with the section for objective [{}] {}.\n",
        inputs.chapter.index, inputs.chapter.title, objective.id, objective.description
    );

    let evidence = inputs.facts.evidence_for(&objective.id);
    if !evidence.is_empty() {
        prompt.push_str("\nReference material:\n");
        for hit in evidence {
            prompt.push_str(&format!("- {}\n", truncate(hit.text.trim(), 800)));
        }
    }

    prompt.push_str(&format!(
        "\nChapter so far (do not repeat it):\n{so_far}\n"
    ));

    if let Some(revision) = inputs.revision {
        prompt.push_str(&revision.instructions());
        if let Some(previous) = revision.previous_section(&objective.id) {
            prompt.push_str(&format!(
                "\nPrevious version of this section:\n{}\n",
                truncate(previous, 3000)
            ));
        }
    }

    prompt.push_str(&format!(
        "\nStart with a \"## \" heading. Where a runnable code example would help, insert a \
         marker {ARTIFACT_OPEN} <what the code should show>{ARTIFACT_CLOSE} on its own line \
         instead of writing the code. Respond with the section text only."
    ));
    prompt
}

fn closer_prompt(inputs: &DraftInputs<'_>, so_far: &str) -> String {
    let mut prompt = format!(
        "Close chapter {} \"{}\".\n\nChapter text:\n{}\n\n\
         Learning objectives:\n{}\n",
        inputs.chapter.index,
        inputs.chapter.title,
        so_far,
        objectives_list(&inputs.chapter.objectives)
    );
    if let Some(revision) = inputs.revision {
        push_list(&mut prompt, "Reviewer feedback to address", &revision.feedback);
    }
    prompt.push_str(
        "\nWrite a synthesis paragraph, 3 to 5 review questions that test the objectives and one \
         practice exercise.\n\
         Respond with ONLY valid JSON, no other text.\n\
         Format: {\"synthesis\": \"...\", \"questions\": [\"...\"], \"exercise\": \"...\"}",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::GenerationRequest;
    use crate::error::AttemptError;
    use crate::model::{ReviewVerdict, Verdict};
    use crate::stages::testing::{Scripted, context};

    fn chapter() -> Chapter {
        Chapter::new(
            "job-1",
            1,
            "Ownership".into(),
            "Moves and borrows.".into(),
            vec![
                LearningObjective {
                    id: "1.1".into(),
                    description: "Explain move semantics".into(),
                    level: "intro".into(),
                },
                LearningObjective {
                    id: "1.2".into(),
                    description: "Use shared borrows".into(),
                    level: "intro".into(),
                },
            ],
        )
    }

    fn scripted_text(request: &GenerationRequest) -> Result<String, AttemptError> {
        Ok(match request.task {
            GenerationTask::Opener => "# Ownership".to_string(),
            GenerationTask::Body if request.user.contains("[1.1]") => {
                "## Moves\nValues move.\n[[CODE: a value moved into a function]]\nDone.".to_string()
            }
            GenerationTask::Body => "## Borrows\nShared borrows are read-only.".to_string(),
            GenerationTask::Closer => {
                r#"{"synthesis": "Ownership ties it together.", "questions": ["What is a move?"], "exercise": "Borrow a vector."}"#.to_string()
            }
            other => panic!("unexpected task {other}"),
        })
    }

    #[test]
    fn extracts_and_strips_markers() {
        let (text, artifacts) = extract_artifacts(
            "Intro.\n[[CODE: a closure capturing by move]]\nMiddle [[CODE:  iterator chain ]] end.",
            "2.1",
        );
        assert_eq!(text, "Intro.\n\nMiddle  end.");
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].description, "a closure capturing by move");
        assert_eq!(artifacts[1].description, "iterator chain");
        assert_eq!(artifacts[1].objective_id, "2.1");
    }

    #[test]
    fn unterminated_marker_stays_in_text() {
        let (text, artifacts) = extract_artifacts("Text [[CODE: never closed", "1.1");
        assert_eq!(text, "Text [[CODE: never closed");
        assert!(artifacts.is_empty());
    }

    #[tokio::test]
    async fn drafts_sections_in_objective_order() {
        let generator = Scripted::new(scripted_text);
        let ctx = context(generator.clone());
        let chapter = chapter();

        let out = run(&ctx, &chapter, &FactSheet::default(), "digest", None)
            .await
            .unwrap();

        let ids: Vec<&str> = out.content.sections.iter().map(|s| s.objective_id.as_str()).collect();
        assert_eq!(ids, vec!["1.1", "1.2"]);
        assert_eq!(out.content.opener, "# Ownership");
        assert_eq!(out.content.sections[0].text, "## Moves\nValues move.\n\nDone.");
        assert_eq!(out.artifacts.len(), 1);
        assert_eq!(out.content.closer.questions, vec!["What is a move?"]);
        assert_eq!(ctx.accumulators.open_count(), 0);

        let tasks: Vec<GenerationTask> = generator.requests().iter().map(|r| r.task).collect();
        assert_eq!(
            tasks,
            vec![
                GenerationTask::Opener,
                GenerationTask::Body,
                GenerationTask::Body,
                GenerationTask::Closer
            ]
        );
        // The second body call sees what the first one wrote.
        assert!(generator.requests()[2].user.contains("Values move."));
    }

    #[tokio::test]
    async fn unparsed_closer_becomes_synthesis() {
        let generator = Scripted::new(|request| match request.task {
            GenerationTask::Closer => Ok("Plain closing words.".to_string()),
            _ => scripted_text(request),
        });
        let ctx = context(generator);

        let out = run(&ctx, &chapter(), &FactSheet::default(), "", None)
            .await
            .unwrap();
        assert_eq!(out.content.closer.synthesis, "Plain closing words.");
        assert!(out.content.closer.questions.is_empty());
    }

    #[tokio::test]
    async fn failed_body_call_closes_the_slot() {
        let generator = Scripted::new(|request| match request.task {
            GenerationTask::Body => Err(AttemptError::Transport("connection reset".into())),
            _ => scripted_text(request),
        });
        let ctx = context(generator);

        let err = run(&ctx, &chapter(), &FactSheet::default(), "", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Transient(_)));
        assert_eq!(ctx.accumulators.open_count(), 0);
    }

    #[tokio::test]
    async fn revision_feedback_reaches_prompts() {
        let generator = Scripted::new(scripted_text);
        let ctx = context(generator.clone());
        let rejected = RevisionAttempt {
            number: 1,
            draft: DraftContent {
                opener: "old opener".into(),
                sections: vec![BodySection {
                    objective_id: "1.2".into(),
                    text: "old borrow section".into(),
                }],
                closer: Closer::default(),
                code_examples: Vec::new(),
            },
            verdict: ReviewVerdict {
                score: 60,
                verdict: Verdict::NeedsRevision,
                coverage_gaps: vec!["1.2".into()],
                out_of_scope: vec!["unsafe code".into()],
                feedback: vec!["Add a diagram of borrows".into()],
            },
        };
        let revision = RevisionContext::from_rejected(&rejected);
        assert_eq!(revision.attempt, 2);

        run(&ctx, &chapter(), &FactSheet::default(), "", Some(&revision))
            .await
            .unwrap();

        let requests = generator.requests();
        assert!(requests[0].user.contains("revision attempt 2"));
        assert!(requests[0].user.contains("old opener"));
        assert!(requests[2].user.contains("old borrow section"));
        assert!(requests[2].user.contains("unsafe code"));
        assert!(requests[3].user.contains("Add a diagram of borrows"));
    }

    #[tokio::test]
    async fn long_chapters_reach_later_prompts_in_full() {
        let objectives: Vec<LearningObjective> = (1..=3)
            .map(|n| LearningObjective {
                id: format!("1.{n}"),
                description: format!("Explain lifetime rule {n}"),
                level: "intro".into(),
            })
            .collect();
        let chapter = Chapter::new("job-1", 1, "Lifetimes".into(), String::new(), objectives);
        let generator = Scripted::new(|request| {
            Ok(match request.task {
                GenerationTask::Body => {
                    let n = ["[1.1]", "[1.2]", "[1.3]"]
                        .iter()
                        .position(|id| request.user.lines().next().unwrap_or_default().contains(id))
                        .map_or(0, |i| i + 1);
                    format!("## Rule {n}\n{}\nend of rule {n}", "Lifetimes bound references. ".repeat(150))
                }
                GenerationTask::Closer => r#"{"synthesis": "Done."}"#.to_string(),
                _ => "# Lifetimes".to_string(),
            })
        });
        let ctx = context(generator.clone());

        run(&ctx, &chapter, &FactSheet::default(), "", None)
            .await
            .unwrap();

        let requests = generator.requests();
        let third_body = &requests[3].user;
        let closer = &requests[4].user;
        assert!(third_body.len() > 8_000);
        assert!(third_body.contains("end of rule 1"));
        assert!(third_body.contains("end of rule 2"));
        assert!(closer.contains("# Lifetimes"));
        assert!(closer.contains("end of rule 3"));
    }
}
