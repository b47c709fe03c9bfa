//! Erros do cliente da API Anthropic e sua classificação para o executor de retentativas.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnthropicError {
    /// HTTP 429. `retry_after_ms` vem do cabeçalho `retry-after`.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Qualquer outro status de erro. `message` é a mensagem do corpo `{"error": {...}}`
    /// quando existe, senão o corpo bruto.
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Status 2xx com um corpo que não é uma resposta de `v1/messages`.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Falha de transporte: DNS, conexão recusada, timeout.
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl AnthropicError {
    /// `true` quando repetir a mesma requisição pode dar certo: 429, 5xx e transporte.
    pub fn is_transient(&self) -> bool {
        match self {
            AnthropicError::RateLimited { .. } => true,
            AnthropicError::ApiError { status, .. } => *status >= 500,
            AnthropicError::MalformedResponse(_) => false,
            AnthropicError::NetworkError(inner) => !inner.is_decode(),
        }
    }
}
