use serde::Deserialize;
use tracing::{debug, warn};

use crate::collaborators::{ComplianceReport, GenerationTask};
use crate::content::Generated;
use crate::context::JobContext;
use crate::coverage::{CoverageReport, CoverageValidator};
use crate::error::StageError;
use crate::model::{Chapter, DraftContent, ReviewVerdict, Verdict};

const UNPARSED_FEEDBACK: &str =
    "The review could not be read. Keep every section under a clear heading tied to one objective.";

#[derive(Debug, Deserialize)]
struct Assessment {
    score: f64,
    #[serde(default)]
    required_changes: Vec<String>,
    #[serde(default)]
    hallucinated_topics: Vec<String>,
    #[serde(default)]
    missing_objectives: Vec<String>,
    #[serde(default)]
    feedback: Option<String>,
}

/// Review one fully assembled draft and produce its verdict.
pub async fn run(
    ctx: &JobContext,
    chapter: &Chapter,
    draft: &DraftContent,
) -> Result<ReviewVerdict, StageError> {
    let rendered = draft.render();
    let coverage = CoverageValidator::new(ctx.settings.coverage_threshold)
        .coverage(&chapter.objectives, &rendered);
    let compliance = compliance_report(ctx, chapter, &rendered).await;

    let raw = ctx
        .generate(
            GenerationTask::Review,
            reviewer_system_prompt(ctx),
            review_prompt(chapter, &rendered, &coverage),
        )
        .await?;

    let verdict = build_verdict(
        Generated::parse(&raw),
        &coverage,
        compliance.as_ref(),
        ctx.settings.approval_threshold,
    );
    debug!(
        job_id = %ctx.job_id,
        chapter = chapter.index,
        score = verdict.score,
        coverage = coverage.percent,
        approved = verdict.is_approved(),
        "review finished"
    );
    Ok(verdict)
}

async fn compliance_report(
    ctx: &JobContext,
    chapter: &Chapter,
    rendered: &str,
) -> Option<ComplianceReport> {
    let standards = ctx.collaborators.standards.as_ref();
    match ctx
        .policy
        .invoke("standards.validate", move || standards.validate(rendered))
        .await
    {
        Ok(report) => Some(report),
        Err(e) => {
            warn!(job_id = %ctx.job_id, chapter = chapter.index, error = %e, "compliance check unavailable");
            None
        }
    }
}

fn build_verdict(
    assessment: Generated<Assessment>,
    coverage: &CoverageReport,
    compliance: Option<&ComplianceReport>,
    threshold: u32,
) -> ReviewVerdict {
    let uncovered: Vec<String> = coverage.uncovered().into_iter().map(str::to_string).collect();

    let (score, mut feedback, mut gaps, out_of_scope) = match assessment {
        Generated::Parsed(a) => {
            let mut feedback = a.required_changes;
            if let Some(summary) = a.feedback.filter(|f| !f.trim().is_empty()) {
                feedback.push(summary);
            }
            (
                a.score.clamp(0.0, 100.0).round() as u32,
                feedback,
                a.missing_objectives,
                a.hallucinated_topics,
            )
        }
        Generated::Unparsed(_) => (0, vec![UNPARSED_FEEDBACK.to_string()], Vec::new(), Vec::new()),
    };

    for id in &uncovered {
        if !gaps.contains(id) {
            gaps.push(id.clone());
        }
    }
    if !uncovered.is_empty() {
        feedback.push(format!(
            "Objectives {} are not covered by the text.",
            uncovered.join(", ")
        ));
    }
    if let Some(report) = compliance {
        feedback.extend(
            report
                .findings
                .iter()
                .map(|f| format!("Compliance ({}): {f}", report.status)),
        );
    }

    ReviewVerdict {
        score,
        verdict: if score >= threshold {
            Verdict::Approved
        } else {
            Verdict::NeedsRevision
        },
        coverage_gaps: gaps,
        out_of_scope,
        feedback,
    }
}

fn reviewer_system_prompt(ctx: &JobContext) -> String {
    format!(
        "You are a strict technical editor reviewing chapters of \"{}\" written for {}. \
         Score honestly; do not reward length.",
        ctx.spec.title, ctx.spec.audience
    )
}

fn review_prompt(chapter: &Chapter, rendered: &str, coverage: &CoverageReport) -> String {
    let objectives = chapter
        .objectives
        .iter()
        .map(|o| format!("- [{}] {}", o.id, o.description))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Review chapter {} \"{}\".\n\n\
         Learning objectives:\n{}\n\n\
         Keyword coverage estimate: {:.0}%.\n\n\
         Chapter text:\n{}\n\n\
         Score the chapter from 0 to 100 for accuracy, clarity and objective coverage. \
         List required changes, topics that go beyond the objectives, and ids of objectives \
         that are missing.\n\
         Respond with ONLY valid JSON, no other text.\n\
         Format: {{\"score\": 0, \"required_changes\": [], \"hallucinated_topics\": [], \
         \"missing_objectives\": [], \"feedback\": \"...\"}}",
        chapter.index,
        chapter.title,
        objectives,
        coverage.percent,
        rendered
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BodySection, Closer, LearningObjective};
    use crate::stages::testing::{Scripted, context};
    use std::collections::BTreeMap;

    fn chapter() -> Chapter {
        Chapter::new(
            "job-1",
            1,
            "Errors".into(),
            String::new(),
            vec![
                LearningObjective {
                    id: "1.1".into(),
                    description: "Propagate errors with the question operator".into(),
                    level: "intro".into(),
                },
                LearningObjective {
                    id: "1.2".into(),
                    description: "Define custom error enums".into(),
                    level: "intro".into(),
                },
            ],
        )
    }

    fn draft() -> DraftContent {
        DraftContent {
            opener: "# Errors".into(),
            sections: vec![BodySection {
                objective_id: "1.1".into(),
                text: "The question operator will propagate errors upward.".into(),
            }],
            closer: Closer::default(),
            code_examples: Vec::new(),
        }
    }

    fn coverage(gaps: &[&str]) -> CoverageReport {
        let mut per_objective = BTreeMap::new();
        per_objective.insert("1.1".to_string(), !gaps.contains(&"1.1"));
        per_objective.insert("1.2".to_string(), !gaps.contains(&"1.2"));
        CoverageReport {
            all_covered: gaps.is_empty(),
            per_objective,
            percent: 50.0,
        }
    }

    #[test]
    fn threshold_decides_verdict() {
        let parsed = |score: f64| {
            Generated::Parsed(Assessment {
                score,
                required_changes: Vec::new(),
                hallucinated_topics: Vec::new(),
                missing_objectives: Vec::new(),
                feedback: None,
            })
        };
        assert!(build_verdict(parsed(90.0), &coverage(&[]), None, 90).is_approved());
        assert!(!build_verdict(parsed(89.6), &coverage(&[]), None, 91).is_approved());
        assert_eq!(build_verdict(parsed(140.0), &coverage(&[]), None, 90).score, 100);
    }

    #[test]
    fn uncovered_objectives_become_gaps_and_feedback() {
        let assessment = Generated::Parsed(Assessment {
            score: 95.0,
            required_changes: vec!["Tighten the intro".into()],
            hallucinated_topics: vec!["async".into()],
            missing_objectives: vec!["1.2".into()],
            feedback: Some("Solid overall".into()),
        });
        let report = ComplianceReport {
            status: "warn".into(),
            findings: vec!["missing accessibility note".into()],
            score: 80.0,
        };
        let verdict = build_verdict(assessment, &coverage(&["1.2"]), Some(&report), 90);

        assert_eq!(verdict.coverage_gaps, vec!["1.2"]);
        assert_eq!(verdict.out_of_scope, vec!["async"]);
        assert_eq!(verdict.feedback[0], "Tighten the intro");
        assert_eq!(verdict.feedback[1], "Solid overall");
        assert!(verdict.feedback[2].contains("1.2"));
        assert_eq!(verdict.feedback[3], "Compliance (warn): missing accessibility note");
    }

    #[test]
    fn unparsed_review_needs_revision() {
        let verdict = build_verdict(Generated::Unparsed("LGTM!".into()), &coverage(&[]), None, 90);
        assert_eq!(verdict.score, 0);
        assert_eq!(verdict.verdict, Verdict::NeedsRevision);
        assert_eq!(verdict.feedback, vec![UNPARSED_FEEDBACK]);
    }

    #[tokio::test]
    async fn review_uses_rendered_draft_and_coverage() {
        let generator = Scripted::new(|_| {
            Ok(r#"Here you go: {"score": 92, "required_changes": [], "feedback": "ok"}"#.into())
        });
        let ctx = context(generator.clone());

        let verdict = run(&ctx, &chapter(), &draft()).await.unwrap();

        // 1.2 has no matching keywords in the text, so it stays a gap.
        assert_eq!(verdict.score, 92);
        assert!(verdict.is_approved());
        assert_eq!(verdict.coverage_gaps, vec!["1.2"]);

        let request = &generator.requests()[0];
        assert_eq!(request.task, GenerationTask::Review);
        assert!(request.user.contains("question operator will propagate"));
        assert!(request.user.contains("coverage estimate: 50%"));
    }

    #[tokio::test]
    async fn review_sees_the_whole_draft() {
        let generator = Scripted::new(|_| Ok(r#"{"score": 91}"#.into()));
        let ctx = context(generator.clone());
        let long = DraftContent {
            opener: "# Errors".into(),
            sections: vec![
                BodySection {
                    objective_id: "1.1".into(),
                    text: "Propagate errors with the question operator. ".repeat(300),
                },
                BodySection {
                    objective_id: "1.2".into(),
                    text: "Custom error enums close the chapter body.".into(),
                },
            ],
            closer: Closer {
                synthesis: "Errors are values.".into(),
                questions: vec!["When does ? convert errors?".into()],
                exercise: String::new(),
            },
            code_examples: Vec::new(),
        };

        run(&ctx, &chapter(), &long).await.unwrap();

        let prompt = &generator.requests()[0].user;
        assert!(prompt.len() > 13_000);
        assert!(prompt.contains("Custom error enums close the chapter body."));
        assert!(prompt.contains("Errors are values."));
        assert!(prompt.contains("When does ? convert errors?"));
    }
}
