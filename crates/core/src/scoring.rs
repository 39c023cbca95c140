use async_trait::async_trait;
use std::collections::HashSet;

use crate::error::ScoringError;
use crate::models::RetrievedPassage;

/// How well a response is supported by the retrieved context, in [0, 1].
/// Implementations must be deterministic for identical inputs; a
/// model-backed scorer can be substituted without touching the workflow.
#[async_trait]
pub trait GroundednessScorer {
    async fn score(
        &self,
        response: &str,
        context: &[RetrievedPassage],
    ) -> Result<f32, ScoringError>;
}

/// Fraction of response content tokens that appear anywhere in the
/// retrieved context. Crude but deterministic and dependency-free.
#[derive(Debug, Clone, Copy)]
pub struct LexicalOverlapScorer {
    pub min_token_len: usize,
}

impl Default for LexicalOverlapScorer {
    fn default() -> Self {
        Self { min_token_len: 3 }
    }
}

fn content_tokens(text: &str, min_len: usize) -> Vec<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .map(|token| token.to_lowercase())
        .filter(|token| token.len() >= min_len)
        .collect()
}

#[async_trait]
impl GroundednessScorer for LexicalOverlapScorer {
    async fn score(
        &self,
        response: &str,
        context: &[RetrievedPassage],
    ) -> Result<f32, ScoringError> {
        let response_tokens = content_tokens(response, self.min_token_len);
        if response_tokens.is_empty() || context.is_empty() {
            return Ok(0.0);
        }

        let context_tokens: HashSet<String> = context
            .iter()
            .flat_map(|passage| content_tokens(&passage.text, self.min_token_len))
            .collect();

        let supported = response_tokens
            .iter()
            .filter(|token| context_tokens.contains(*token))
            .count();

        Ok((supported as f32 / response_tokens.len() as f32).clamp(0.0, 1.0))
    }
}

/// Constant score, for tests and for wiring up the pipeline before a real
/// scoring backend exists.
#[derive(Debug, Clone, Copy)]
pub struct FixedScorer(pub f32);

#[async_trait]
impl GroundednessScorer for FixedScorer {
    async fn score(
        &self,
        _response: &str,
        _context: &[RetrievedPassage],
    ) -> Result<f32, ScoringError> {
        Ok(self.0)
    }
}
