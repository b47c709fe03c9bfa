use tracing::{debug, warn};

use super::author_system_prompt;
use crate::collaborators::GenerationTask;
use crate::context::JobContext;
use crate::error::{CallError, StageError};
use crate::model::{BookStats, BookStructure, Chapter, ChapterStatus, CompiledChapter};

/// Assemble the book from every chapter's final state.
///
/// Chapters that did not reach approval are carried with their best draft and
/// flagged. Only the preface needs an external call.
pub async fn run(ctx: &JobContext, chapters: &[Chapter]) -> Result<BookStructure, StageError> {
    if let Some(pending) = chapters.iter().find(|c| !c.status.is_terminal()) {
        return Err(StageError::Validation(format!(
            "chapter {} is still {}",
            pending.index, pending.status
        )));
    }

    let stats = BookStats::from_chapters(chapters);
    let preface = match ctx
        .generate(
            GenerationTask::Preface,
            author_system_prompt(&ctx.spec),
            preface_prompt(ctx, chapters),
        )
        .await
    {
        Ok(text) => text.trim().to_string(),
        Err(CallError::Rejected(reason)) => {
            warn!(job_id = %ctx.job_id, %reason, "preface rejected, compiling without one");
            String::new()
        }
        Err(e) => return Err(e.into()),
    };

    let compiled: Vec<CompiledChapter> = chapters.iter().map(compile_chapter).collect();
    debug!(
        job_id = %ctx.job_id,
        chapters = compiled.len(),
        approved = stats.approved,
        average = ?stats.average_score,
        "book compiled"
    );

    Ok(BookStructure {
        title: ctx.spec.title.clone(),
        audience: ctx.spec.audience.clone(),
        preface,
        chapters: compiled,
        stats,
    })
}

fn compile_chapter(chapter: &Chapter) -> CompiledChapter {
    CompiledChapter {
        index: chapter.index,
        title: chapter.title.clone(),
        status: chapter.status,
        score: chapter.score(),
        objectives: chapter.objectives.clone(),
        content: chapter.draft.clone(),
        questions: chapter
            .draft
            .as_ref()
            .map(|d| d.closer.questions.clone())
            .unwrap_or_default(),
        flagged: chapter.status != ChapterStatus::Approved,
    }
}

fn preface_prompt(ctx: &JobContext, chapters: &[Chapter]) -> String {
    let toc = chapters
        .iter()
        .map(|c| format!("{}. {} - {}", c.index, c.title, c.summary))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Write a short preface for \"{}\" addressed to {}. \
         Say who the book is for and how it is organised.\n\n\
         Table of contents:\n{}\n\n\
         Respond with the preface text only, in Markdown.",
        ctx.spec.title, ctx.spec.audience, toc
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AttemptError;
    use crate::model::{Closer, DraftContent, ReviewVerdict, RevisionAttempt, Verdict};
    use crate::stages::testing::{Scripted, context};

    fn finished(index: usize, status: ChapterStatus, score: u32) -> Chapter {
        let mut chapter = Chapter::new("job-1", index, format!("Chapter {index}"), String::new(), Vec::new());
        let draft = DraftContent {
            opener: format!("# Chapter {index}"),
            sections: Vec::new(),
            closer: Closer {
                synthesis: "Wrap up.".into(),
                questions: vec!["Q1".into(), "Q2".into()],
                exercise: String::new(),
            },
            code_examples: Vec::new(),
        };
        chapter.attempts.push(RevisionAttempt {
            number: 1,
            draft: draft.clone(),
            verdict: ReviewVerdict {
                score,
                verdict: if status == ChapterStatus::Approved {
                    Verdict::Approved
                } else {
                    Verdict::NeedsRevision
                },
                coverage_gaps: Vec::new(),
                out_of_scope: Vec::new(),
                feedback: Vec::new(),
            },
        });
        chapter.draft = Some(draft);
        chapter.status = status;
        chapter
    }

    #[tokio::test]
    async fn compiles_and_flags_unapproved_chapters() {
        let generator = Scripted::new(|_| Ok("  Welcome to the book.  ".into()));
        let ctx = context(generator);
        let chapters = vec![
            finished(1, ChapterStatus::Approved, 95),
            finished(2, ChapterStatus::Failed, 70),
        ];

        let book = run(&ctx, &chapters).await.unwrap();
        assert_eq!(book.preface, "Welcome to the book.");
        assert_eq!(book.chapters.len(), 2);
        assert!(!book.chapters[0].flagged);
        assert!(book.chapters[1].flagged);
        assert_eq!(book.chapters[1].score, Some(70));
        assert_eq!(book.stats.average_score, Some(82.5));
        assert_eq!(book.stats.question_count, 4);
    }

    #[tokio::test]
    async fn rejected_preface_is_empty() {
        let generator = Scripted::new(|_| Err(AttemptError::Rejected("400".into())));
        let ctx = context(generator);
        let book = run(&ctx, &[finished(1, ChapterStatus::Approved, 91)]).await.unwrap();
        assert!(book.preface.is_empty());
    }

    #[tokio::test]
    async fn transient_preface_failure_fails_compile() {
        let generator = Scripted::new(|_| Err(AttemptError::Transport("timeout".into())));
        let ctx = context(generator);
        let err = run(&ctx, &[finished(1, ChapterStatus::Approved, 91)])
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Transient(_)));
    }

    #[tokio::test]
    async fn refuses_chapters_still_in_progress() {
        let generator = Scripted::new(|_| Ok(String::new()));
        let ctx = context(generator);
        let mut chapter = finished(1, ChapterStatus::Approved, 91);
        chapter.status = ChapterStatus::Reviewing;
        assert!(matches!(
            run(&ctx, &[chapter]).await,
            Err(StageError::Validation(_))
        ));
    }
}
