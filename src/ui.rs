//! Interface de terminal do bookforge — spinner e saída colorida.
//!
//! Usa as crates `indicatif` para o spinner de progresso e `console` para
//! estilização com cores. O [`JobProgress`] acompanha visualmente a execução
//! de um job e imprime a tabela de notas por capítulo ao final.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::model::{Chapter, ChapterStatus, JobResult, JobStatus, ScoreRow};
use crate::orchestrator::JobObserver;
use crate::stages::Stage;

/// Indicador visual de progresso para a execução de um job no terminal.
///
/// Exibe um spinner animado durante o processamento e mensagens coloridas
/// para capítulos aprovados (verde), reprovados (vermelho) e avisos (amarelo).
pub struct JobProgress {
    // Barra de progresso/spinner do indicatif.
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl JobProgress {
    /// Inicia o spinner com o título do livro.
    pub fn start(title: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("OUTLINE: {title}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Finaliza o spinner e exibe o status final do job.
    pub fn complete(&self, result: &JobResult) {
        self.pb.finish_and_clear();
        match result.status {
            JobStatus::Completed => {
                println!(
                    "  {} Book compiled in {:.1}s",
                    self.green.apply_to("✓"),
                    result.duration_ms as f64 / 1000.0
                );
            }
            _ => {
                let reason = result.error.as_deref().unwrap_or("unknown error");
                println!("  {} Job failed: {reason}", self.red.apply_to("✗"));
            }
        }
    }

    /// Imprime a tabela de notas por capítulo.
    pub fn print_scores(&self, rows: &[ScoreRow]) {
        if rows.is_empty() {
            return;
        }
        println!();
        println!("{}", self.yellow.apply_to("─── Chapter Scores ───"));
        for row in rows {
            let style = match row.status {
                ChapterStatus::Approved => &self.green,
                ChapterStatus::Failed => &self.red,
                _ => &self.yellow,
            };
            let score = row
                .score
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {:>2}. {:<40} {:>3}  {} ({} attempt(s))",
                row.index,
                row.title,
                score,
                style.apply_to(row.status),
                row.attempts
            );
        }
    }
}

impl JobObserver for JobProgress {
    fn stage_started(&self, stage: Stage, chapter: Option<&Chapter>) {
        let message = match chapter {
            Some(c) => format!("{}: chapter {} \"{}\"", stage.to_string().to_uppercase(), c.index, c.title),
            None => stage.to_string().to_uppercase(),
        };
        self.pb.set_message(message);
    }

    fn chapter_finished(&self, chapter: &Chapter) {
        let (mark, style) = if chapter.status == ChapterStatus::Approved {
            ("✓", &self.green)
        } else {
            ("✗", &self.red)
        };
        let score = chapter
            .score()
            .map(|s| format!(" score {s}"))
            .unwrap_or_default();
        self.pb.println(format!(
            "  {} Chapter {} \"{}\" {}{score}",
            style.apply_to(mark),
            chapter.index,
            chapter.title,
            chapter.status
        ));
        if let Some(error) = chapter.error.as_deref() {
            self.pb.println(format!("    {}", self.yellow.apply_to(error)));
        }
    }
}
