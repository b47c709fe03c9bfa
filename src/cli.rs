//! Interface de linha de comando do bookforge baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, validate, status)
//! e flags globais (--config, --max-revisions, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// bookforge — Orquestrador do pipeline de geração de livros técnicos.
#[derive(Debug, Parser)]
#[command(name = "bookforge", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./bookforge.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Número máximo de tentativas de revisão por capítulo.
    #[arg(long, global = true)]
    pub max_revisions: Option<u32>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa um job a partir de um arquivo de especificação.
    Run {
        /// Arquivo TOML ou JSON com a especificação do job.
        spec: PathBuf,

        /// Onde gravar o resultado em JSON (padrão: saída padrão).
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Valida uma especificação de job sem executá-la.
    Validate {
        /// Arquivo TOML ou JSON com a especificação do job.
        file: PathBuf,
    },

    /// Consulta o registro de um job no serviço de persistência.
    Status {
        /// Identificador do job.
        job_id: String,
    },
}
