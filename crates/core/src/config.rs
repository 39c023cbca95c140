use url::Url;

use crate::error::ConfigError;

pub const LLM_API_KEY_VAR: &str = "GROQ_API_KEY";
pub const LLM_API_URL_VAR: &str = "GROQ_API_URL";
pub const LLM_MODEL_VAR: &str = "GROQ_MODEL";
pub const PARSE_API_KEY_VAR: &str = "DOC_PARSE_API_KEY";
pub const PARSE_URL_VAR: &str = "DOC_PARSE_URL";

pub const DEFAULT_CHAT_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const DEFAULT_CHAT_MODEL: &str = "qwen-qwq-32b";
pub const DEFAULT_PARSE_URL: &str = "https://api.cloud.llamaindex.ai/api/v1/parsing";

/// Settings for the hosted chat model. The API key is a hard requirement
/// for the query path; constructing this fails before any workflow runs.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub endpoint: Url,
    pub api_key: String,
    pub model: String,
}

impl LlmConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = non_empty_var(LLM_API_KEY_VAR)
            .ok_or(ConfigError::MissingSecret(LLM_API_KEY_VAR))?;

        let endpoint = non_empty_var(LLM_API_URL_VAR)
            .unwrap_or_else(|| DEFAULT_CHAT_URL.to_string());
        let endpoint = Url::parse(&endpoint).map_err(|source| ConfigError::InvalidEndpoint {
            name: LLM_API_URL_VAR,
            source,
        })?;

        let model = non_empty_var(LLM_MODEL_VAR).unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string());

        Ok(Self {
            endpoint,
            api_key,
            model,
        })
    }
}

/// Settings for the remote document parsing service. Missing key means the
/// ingestion path degrades to local extraction, nothing more.
#[derive(Debug, Clone)]
pub struct ParseServiceConfig {
    pub endpoint: String,
    pub api_key: String,
}

impl ParseServiceConfig {
    pub fn from_env() -> Option<Self> {
        let api_key = non_empty_var(PARSE_API_KEY_VAR)?;
        let endpoint = non_empty_var(PARSE_URL_VAR).unwrap_or_else(|| DEFAULT_PARSE_URL.to_string());
        Some(Self { endpoint, api_key })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    let value = std::env::var(name).ok()?;
    let value = value.trim().to_string();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
