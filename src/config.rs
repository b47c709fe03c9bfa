//! Configuração do bookforge carregada a partir de `bookforge.toml`.
//!
//! A struct [`BookforgeConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `ANTHROPIC_API_KEY` tem precedência sobre o arquivo.

use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::Deserialize;

use crate::retry::RetryPolicy;

/// Configuração de nível superior carregada de `bookforge.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct BookforgeConfig {
    /// Chave da API Anthropic.
    #[serde(default)]
    pub api_key: String,

    /// Identificador do modelo usado em todas as chamadas de geração.
    #[serde(default = "default_model")]
    pub model: String,

    /// Limite de tokens por resposta gerada.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Temperatura base da geração de texto corrido.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub pipeline: PipelineSection,

    #[serde(default)]
    pub services: ServicesSection,
}

/// Parâmetros do executor de retentativas (chamadas externas).
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    /// Número total de tentativas por chamada.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Intervalo fixo entre tentativas, em milissegundos.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Timeout individual de cada chamada, em milissegundos.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

/// Parâmetros do pipeline de geração.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    /// Máximo de tentativas de revisão por capítulo.
    #[serde(default = "default_max_revisions")]
    pub max_revisions: u32,

    /// Nota mínima (0-100) para aprovar um capítulo.
    #[serde(default = "default_approval_threshold")]
    pub approval_threshold: u32,

    /// Fração de palavras-chave exigida para considerar um objetivo coberto.
    #[serde(default = "default_coverage_threshold")]
    pub coverage_threshold: f64,

    /// Quantos capítulos podem rodar em paralelo.
    #[serde(default = "default_chapter_concurrency")]
    pub chapter_concurrency: usize,

    /// Timeout global do job, em segundos.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// Gera exemplos de código quando o rascunho os solicita.
    #[serde(default = "default_include_code")]
    pub include_code: bool,
}

/// URLs base dos serviços externos. Ausente = colaborador nulo.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServicesSection {
    pub retrieval_url: Option<String>,
    pub standards_url: Option<String>,
    pub persistence_url: Option<String>,
}

fn default_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.7
}

// Valor padrão para tentativas: 3.
fn default_max_attempts() -> u32 {
    3
}

// Valor padrão para o intervalo entre tentativas: 1000ms.
fn default_backoff_ms() -> u64 {
    1000
}

fn default_call_timeout_ms() -> u64 {
    60_000
}

fn default_max_revisions() -> u32 {
    3
}

fn default_approval_threshold() -> u32 {
    90
}

fn default_coverage_threshold() -> f64 {
    0.5
}

fn default_chapter_concurrency() -> usize {
    1
}

fn default_job_timeout_secs() -> u64 {
    3600
}

fn default_include_code() -> bool {
    true
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_revisions: default_max_revisions(),
            approval_threshold: default_approval_threshold(),
            coverage_threshold: default_coverage_threshold(),
            chapter_concurrency: default_chapter_concurrency(),
            job_timeout_secs: default_job_timeout_secs(),
            include_code: default_include_code(),
        }
    }
}

impl Default for BookforgeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            retry: RetrySection::default(),
            pipeline: PipelineSection::default(),
            services: ServicesSection::default(),
        }
    }
}

impl BookforgeConfig {
    /// Carrega a configuração de `bookforge.toml` no diretório atual,
    /// ou do caminho informado. Usa valores padrão se o arquivo não existir.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new("bookforge.toml"));
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<BookforgeConfig>(&contents)?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo de configuração para a chave API.
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            if !key.is_empty() {
                config.api_key = key;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejeita combinações de parâmetros que o pipeline não consegue honrar.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.pipeline.max_revisions == 0 {
            bail!("pipeline.max_revisions must be at least 1");
        }
        if self.pipeline.approval_threshold > 100 {
            bail!("pipeline.approval_threshold must be within 0..=100");
        }
        let ratio = self.pipeline.coverage_threshold;
        if !(ratio > 0.0 && ratio <= 1.0) {
            bail!("pipeline.coverage_threshold must be within (0, 1]");
        }
        if self.pipeline.chapter_concurrency == 0 {
            bail!("pipeline.chapter_concurrency must be at least 1");
        }
        if self.call_timeout() >= self.job_timeout() {
            bail!("retry.call_timeout_ms must be shorter than pipeline.job_timeout_secs");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            backoff: Duration::from_millis(self.retry.backoff_ms),
            call_timeout: self.call_timeout(),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.retry.call_timeout_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.job_timeout_secs)
    }
}
