//! # Prompts
//!
//! [`ChartRequestBuilder`] renders the two grounding prompts sent to the
//! generative model:
//!
//! - the **chart** prompt restates the query, lists the retrieved records as a
//!   JSON array of `{metadata, distance}`, names the wanted chart type, spells
//!   out the `{"type", "labels", "values"}` schema and demands JSON only;
//! - the **explanation** prompt lists a few records as `Data: {...}` lines and
//!   asks for prose only.
//!
//! The chart schema is the contract [`parse_chart_spec`](crate::chart::parse_chart_spec)
//! enforces, so the two must change together.
//!
//! With a [`TokenBudget`] the least similar hits are dropped until the prompt
//! fits; the instructions themselves are always kept.

use serde::Serialize;
use tiktoken_rs::{CoreBPE, cl100k_base};
use tracing::debug;

use crate::chart::ChartKind;
use crate::config::RagConfig;
use crate::corpus::CorpusRecord;

/// A retrieved record and its distance from the query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SearchHit<'a> {
    #[serde(rename = "metadata")]
    pub record: &'a CorpusRecord,
    pub distance: f32,
}

/// Upper bound on the `cl100k_base` size of a rendered prompt.
pub struct TokenBudget {
    max_tokens: usize,
    bpe: CoreBPE,
}

impl TokenBudget {
    pub fn new(max_tokens: usize) -> Result<Self, String> {
        let bpe = cl100k_base().map_err(|e| format!("failed to load cl100k_base: {e}"))?;
        Ok(Self { max_tokens, bpe })
    }

    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    fn fits(&self, text: &str) -> bool {
        self.count(text) <= self.max_tokens
    }
}

/// Renders chart and explanation prompts from search hits.
pub struct ChartRequestBuilder {
    chart_hits: usize,
    text_hits: usize,
    budget: Option<TokenBudget>,
}

impl ChartRequestBuilder {
    pub fn new(chart_hits: usize, text_hits: usize) -> Self {
        Self {
            chart_hits,
            text_hits,
            budget: None,
        }
    }

    pub fn with_budget(mut self, budget: TokenBudget) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn from_config(config: &RagConfig) -> Result<Self, String> {
        let builder = Self::new(config.chart_context_hits, config.text_context_hits);
        match config.max_prompt_tokens {
            Some(max) => Ok(builder.with_budget(TokenBudget::new(max)?)),
            None => Ok(builder),
        }
    }

    /// Prompt asking for a `{type, labels, values}` document of `kind`.
    pub fn chart_prompt(&self, query: &str, kind: ChartKind, hits: &[SearchHit<'_>]) -> String {
        let hits = &hits[..hits.len().min(self.chart_hits)];
        self.fit(hits, |hits| render_chart_prompt(query, kind, hits))
    }

    /// Prompt asking for a plain-language explanation of the top hits.
    pub fn explanation_prompt(&self, query: &str, hits: &[SearchHit<'_>]) -> String {
        let hits = &hits[..hits.len().min(self.text_hits)];
        self.fit(hits, |hits| render_explanation_prompt(query, hits))
    }

    fn fit<F>(&self, hits: &[SearchHit<'_>], render: F) -> String
    where
        F: Fn(&[SearchHit<'_>]) -> String,
    {
        let mut used = hits.len();
        let mut prompt = render(hits);

        if let Some(budget) = &self.budget {
            while used > 0 && !budget.fits(&prompt) {
                used -= 1;
                prompt = render(&hits[..used]);
            }
            if used < hits.len() {
                debug!(
                    "Prompt trimmed to {used} of {} hits to fit {} tokens",
                    hits.len(),
                    budget.max_tokens
                );
            }
        }

        prompt
    }
}

fn render_chart_prompt(query: &str, kind: ChartKind, hits: &[SearchHit<'_>]) -> String {
    let results = serde_json::to_string_pretty(hits).unwrap_or_else(|_| "[]".to_string());
    format!(
        "The user queried: \"{query}\".\n\
         Based on the results below, generate a suitable visualization.\n\
         The user prefers a {kind} chart.\n\
         Results:\n\
         {results}\n\
         \n\
         Instructions:\n\
         - Provide a JSON structure for creating the {kind} chart.\n\
         - Include labels and values.\n\
         - Ensure the JSON is in the following format:\n\
         {{\n    \"type\": \"{kind}\",\n    \"labels\": [\"label1\", \"label2\", \"label3\"],\n    \"values\": [value1, value2, value3]\n}}\n\
         Respond with JSON only."
    )
}

fn render_explanation_prompt(query: &str, hits: &[SearchHit<'_>]) -> String {
    let summary = hits
        .iter()
        .map(|hit| format!("Data: {}", hit.record))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "The user queried: \"{query}\".\n\
         Based on the top matching results below, provide a general, user-friendly explanation:\n\
         Results:\n\
         {summary}\n\
         \n\
         Instructions:\n\
         - Summarize the insights derived from the results.\n\
         - Explain the relevance of the data to the query without mentioning specific document numbers or IDs.\n\
         - Use clear and concise language.\n\
         Respond with the explanation only."
    )
}
