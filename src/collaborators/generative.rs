use async_trait::async_trait;
use tracing::{debug, warn};

use super::{GenerationRequest, GenerativeService};
use crate::anthropic::{MessageSender, MessagesRequest};
use crate::error::AttemptError;

/// [`GenerativeService`] backed by the Anthropic Messages API.
pub struct AnthropicGenerator<S> {
    sender: S,
    model: String,
}

impl<S: MessageSender> AnthropicGenerator<S> {
    pub fn new(sender: S, model: impl Into<String>) -> Self {
        Self {
            sender,
            model: model.into(),
        }
    }

    fn to_messages_request(&self, request: &GenerationRequest) -> MessagesRequest {
        MessagesRequest::single_turn(
            self.model.as_str(),
            &request.system,
            request.user.as_str(),
            request.temperature,
            request.max_tokens,
        )
    }
}

#[async_trait]
impl<S: MessageSender> GenerativeService for AnthropicGenerator<S> {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, AttemptError> {
        let req = self.to_messages_request(request);
        let response = self.sender.send_message(&req).await?;
        debug!(
            task = %request.task,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "generation finished"
        );
        if response.hit_token_limit() {
            // Truncated text is still usable; structured consumers fall back to Unparsed.
            warn!(task = %request.task, max_tokens = request.max_tokens, "generation hit the token limit");
        }
        let text = response.text();
        if text.trim().is_empty() {
            return Err(AttemptError::Rejected(format!(
                "{} returned no text (stop_reason: {:?})",
                request.task, response.stop_reason
            )));
        }
        Ok(text)
    }
}
