//! Tipos de requisição e resposta do endpoint `v1/messages` da Anthropic.
//!
//! O pipeline só faz chamadas de um turno (sistema + usuário), então os
//! construtores aqui cobrem esse caso; a resposta é reduzida ao texto gerado.

use serde::{Deserialize, Serialize};

/// Corpo da requisição para `/v1/messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    /// Prompt de sistema. Omitido do JSON quando ausente.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Temperatura de amostragem (0.0 a 1.0). Omitida do JSON quando ausente.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    pub messages: Vec<Message>,
}

impl MessagesRequest {
    /// Requisição de um turno só. Um prompt de sistema vazio é omitido.
    pub fn single_turn(
        model: impl Into<String>,
        system: &str,
        user: impl Into<String>,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        Self {
            model: model.into(),
            max_tokens,
            system: (!system.trim().is_empty()).then(|| system.to_string()),
            temperature: Some(temperature),
            messages: vec![Message::user(user)],
        }
    }
}

/// Papel do remetente de uma mensagem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Resposta de `/v1/messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub id: String,
    pub content: Vec<ContentBlock>,
    pub model: String,
    /// "end_turn", "max_tokens", ... `None` se ainda em progresso.
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Usage,
}

impl MessagesResponse {
    /// Concatena os blocos de texto, na ordem recebida. Outros tipos de bloco são ignorados.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|b| b.content_type == "text")
            .map(|b| b.text.as_str())
            .collect()
    }

    /// A geração parou no limite de `max_tokens`, então o texto está cortado.
    pub fn hit_token_limit(&self) -> bool {
        self.stop_reason.as_deref() == Some("max_tokens")
    }
}

/// Um bloco de conteúdo da resposta. Blocos que não são texto chegam com `text` vazio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub text: String,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content_type: "text".into(),
            text: text.into(),
        }
    }
}

/// Consumo de tokens de uma chamada.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_turn_omits_blank_system_prompt() {
        let req = MessagesRequest::single_turn("claude-sonnet-4-5-20250929", "  ", "Outline a book", 0.4, 2048);
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("system").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "Outline a book");
        assert_eq!(json["max_tokens"], 2048);

        let req = MessagesRequest::single_turn("m", "You are an editor.", "Review this", 0.2, 512);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""system":"You are an editor.""#));
        assert!(json.contains(r#""temperature":0.2"#));
    }

    #[test]
    fn text_skips_non_text_blocks() {
        let api_json = r###"{
            "id": "msg_123",
            "content": [
                {"type": "text", "text": "## Ownership\n"},
                {"type": "tool_use", "id": "t1", "name": "lookup", "input": {}},
                {"type": "text", "text": "Every value has one owner."}
            ],
            "model": "claude-sonnet-4-5-20250929",
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 5, "output_tokens": 15}
        }"###;
        let resp: MessagesResponse = serde_json::from_str(api_json).unwrap();
        assert_eq!(resp.text(), "## Ownership\nEvery value has one owner.");
        assert!(!resp.hit_token_limit());
        assert_eq!(resp.usage.output_tokens, 15);
    }

    #[test]
    fn max_tokens_stop_reason_marks_truncation() {
        let json = r#"{
            "id": "msg_456",
            "content": [{"type": "text", "text": "The borrow checker"}],
            "model": "test",
            "stop_reason": "max_tokens"
        }"#;
        let resp: MessagesResponse = serde_json::from_str(json).unwrap();
        assert!(resp.hit_token_limit());
        assert_eq!(resp.usage, Usage::default());
    }
}
