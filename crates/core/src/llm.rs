use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::LlmConfig;
use crate::error::LlmError;

/// Fixed at zero so repeated runs over the same index stay comparable.
pub const DEFAULT_TEMPERATURE: f32 = 0.0;

#[async_trait]
pub trait LanguageModel {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client (the hosted inference
/// endpoint speaks that wire format).
pub struct ChatCompletionsClient {
    endpoint: Url,
    api_key: String,
    model: String,
    temperature: f32,
    client: Client,
}

impl ChatCompletionsClient {
    pub fn new(config: &LlmConfig) -> Self {
        Self::from_parts(config.endpoint.clone(), &config.api_key, &config.model)
    }

    pub fn from_parts(endpoint: Url, api_key: &str, model: &str) -> Self {
        Self {
            endpoint,
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionsClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let payload = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(LlmError::Auth {
                status: status.as_u16(),
            });
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        completion_text(parsed)
    }
}

fn completion_text(response: ChatResponse) -> Result<String, LlmError> {
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .unwrap_or_default();

    if text.is_empty() {
        return Err(LlmError::EmptyCompletion);
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::{completion_text, ChatChoice, ChatChoiceMessage, ChatResponse};
    use crate::error::LlmError;

    fn response(content: Option<&str>) -> ChatResponse {
        ChatResponse {
            choices: vec![ChatChoice {
                message: ChatChoiceMessage {
                    content: content.map(str::to_string),
                },
            }],
        }
    }

    #[test]
    fn first_choice_content_is_returned_trimmed() {
        let text = completion_text(response(Some("  an answer \n"))).unwrap();
        assert_eq!(text, "an answer");
    }

    #[test]
    fn missing_content_is_an_explicit_error() {
        assert!(matches!(
            completion_text(response(None)),
            Err(LlmError::EmptyCompletion)
        ));
        assert!(matches!(
            completion_text(response(Some("   "))),
            Err(LlmError::EmptyCompletion)
        ));
    }

    #[test]
    fn no_choices_is_an_explicit_error() {
        let empty = ChatResponse { choices: vec![] };
        assert!(matches!(
            completion_text(empty),
            Err(LlmError::EmptyCompletion)
        ));
    }
}
