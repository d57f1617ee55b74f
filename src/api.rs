//! # API Module
//!
//! Every call to the generative model goes through [`GenerativeClient`]. It
//! turns one prompt plus a system instruction into raw completion text and
//! owns the retry policy:
//!
//! - each attempt is bounded by `request_timeout`;
//! - any failure (transport error, remote error, timeout, empty completion)
//!   is followed by a fixed `delay` and another attempt;
//! - after `max_attempts` failures the caller gets
//!   [`RagError::GenerationUnavailable`], never partial text.
//!
//! The transport is the [`CompletionBackend`] trait; [`OpenAiBackend`] talks to
//! any OpenAI-compatible chat-completions endpoint through `async-openai`.
//! Delays go through the [`Clock`] trait so tests can observe them without
//! waiting. Dropping the future returned by [`GenerativeClient::complete`]
//! abandons any remaining attempts.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ragchart::api::{GenerativeClient, OpenAiBackend};
//! use ragchart::config::load_config;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("config.yaml")?;
//! let backend = OpenAiBackend::new(&config)?;
//! let client = GenerativeClient::new(Arc::new(backend), config.retry_policy());
//! let text = client.complete("Say hello.", &config.system_prompt).await?;
//! println!("{text}");
//! # Ok(()) }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::RagConfig;
use crate::error::{BackendError, RagError};

/// How hard to try before giving up on the generative model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: usize,
    /// Pause between consecutive attempts.
    pub delay: Duration,
    /// Upper bound for a single attempt.
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// One round trip to a chat-completion service.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, BackendError>;
}

/// Source of the inter-attempt pause.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real time, via `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Retrying wrapper around a [`CompletionBackend`].
#[derive(Clone)]
pub struct GenerativeClient {
    backend: Arc<dyn CompletionBackend>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl GenerativeClient {
    pub fn new(backend: Arc<dyn CompletionBackend>, policy: RetryPolicy) -> Self {
        Self::with_clock(backend, Arc::new(TokioClock), policy)
    }

    pub fn with_clock(
        backend: Arc<dyn CompletionBackend>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            clock,
            policy,
        }
    }

    /// Send `prompt` with the `system` instruction and return the completion text.
    ///
    /// # Errors
    /// [`RagError::GenerationUnavailable`] once every attempt has failed.
    pub async fn complete(&self, prompt: &str, system: &str) -> Result<String, RagError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = BackendError::EmptyResponse;

        for attempt in 1..=attempts {
            let outcome =
                tokio::time::timeout(self.policy.request_timeout, self.backend.complete(system, prompt))
                    .await;

            match outcome {
                Ok(Ok(text)) if !text.trim().is_empty() => {
                    debug!("Completion received on attempt {attempt}/{attempts}");
                    return Ok(text);
                }
                Ok(Ok(_)) => last_error = BackendError::EmptyResponse,
                Ok(Err(err)) => last_error = err,
                Err(_) => last_error = BackendError::Timeout(self.policy.request_timeout),
            }

            if attempt < attempts {
                warn!(
                    "API error: {last_error}. Retrying in {:?}... ({attempt}/{attempts})",
                    self.policy.delay
                );
                self.clock.sleep(self.policy.delay).await;
            } else {
                warn!("API error: {last_error}. Giving up ({attempt}/{attempts})");
            }
        }

        Err(RagError::GenerationUnavailable {
            attempts,
            last_error,
        })
    }
}

/// Chat-completions backend for OpenAI-compatible APIs.
pub struct OpenAiBackend {
    client: Client<OpenAIConfig>,
    model: String,
    max_tokens: Option<u32>,
}

impl OpenAiBackend {
    /// Creates a new backend from configuration.
    ///
    /// The underlying HTTP client carries the per-attempt timeout as well, so
    /// a stalled connection is torn down even outside the retry wrapper.
    pub fn new(config: &RagConfig) -> Result<Self, reqwest::Error> {
        let openai_config = OpenAIConfig::new()
            .with_api_key(config.api_key.clone())
            .with_api_base(config.api_base.clone());
        debug!("Client created for {}", config.api_base);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            client: Client::with_config(openai_config).with_http_client(http),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    #[allow(deprecated)]
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, BackendError> {
        let messages = vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: ChatCompletionRequestSystemMessageContent::Text(system.to_string()),
                name: None,
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(prompt.to_string()),
                name: None,
            }),
        ];

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model.clone()).messages(messages);
        if let Some(max_tokens) = self.max_tokens {
            args.max_tokens(max_tokens);
        }
        let request = args
            .build()
            .map_err(|e| BackendError::Api(e.to_string()))?;

        debug!("Sending request: {:?}", request);

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| BackendError::Api(e.to_string()))?;

        let text: String = response
            .choices
            .into_iter()
            .filter_map(|choice| choice.message.content)
            .collect();

        if text.trim().is_empty() {
            return Err(BackendError::EmptyResponse);
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingClock, ScriptedBackend};
    use httpmock::prelude::*;
    use serde_json::json;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(BackendError::Api("boom".into())),
            Err(BackendError::Api("boom".into())),
            Ok("hello".into()),
        ]));
        let clock = Arc::new(RecordingClock::default());
        let client = GenerativeClient::with_clock(backend.clone(), clock.clone(), policy());

        let text = client.complete("prompt", "system").await.unwrap();

        assert_eq!(text, "hello");
        assert_eq!(backend.calls(), 3);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(10), Duration::from_secs(10)]
        );
    }

    #[tokio::test]
    async fn test_always_failing_backend_exhausts_budget() {
        let backend = Arc::new(ScriptedBackend::always(Err(BackendError::Api(
            "down".into(),
        ))));
        let clock = Arc::new(RecordingClock::default());
        let client = GenerativeClient::with_clock(backend.clone(), clock.clone(), policy());

        let err = client.complete("prompt", "system").await.unwrap_err();

        match err {
            RagError::GenerationUnavailable {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error, BackendError::Api("down".into()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(backend.calls(), 3);
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_completion_is_retried() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Ok("   ".into()),
            Ok("{\"ok\": true}".into()),
        ]));
        let clock = Arc::new(RecordingClock::default());
        let client = GenerativeClient::with_clock(backend.clone(), clock, policy());

        assert_eq!(client.complete("p", "s").await.unwrap(), "{\"ok\": true}");
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_hung_attempt_times_out() {
        let backend = Arc::new(ScriptedBackend::hanging());
        let clock = Arc::new(RecordingClock::default());
        let client = GenerativeClient::with_clock(
            backend.clone(),
            clock,
            RetryPolicy {
                max_attempts: 2,
                delay: Duration::from_secs(10),
                request_timeout: Duration::from_millis(20),
            },
        );

        match client.complete("p", "s").await {
            Err(RagError::GenerationUnavailable { last_error, .. }) => {
                assert_eq!(last_error, BackendError::Timeout(Duration::from_millis(20)));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(backend.calls(), 2);
    }

    fn mock_config(api_base: String) -> RagConfig {
        let mut config = RagConfig::with_defaults("e.npy".into(), "m.json".into());
        config.api_key = "mock_api_key".to_string();
        config.api_base = api_base;
        config.model = "mock_model".to_string();
        config
    }

    #[tokio::test]
    async fn test_openai_backend_returns_message_content() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({
                        "id": "chatcmpl-1",
                        "object": "chat.completion",
                        "created": 1700000000,
                        "model": "mock_model",
                        "choices": [{
                            "index": 0,
                            "message": {
                                "role": "assistant",
                                "content": "{\"type\":\"pie\",\"labels\":[],\"values\":[]}"
                            },
                            "finish_reason": "stop"
                        }],
                        "usage": {
                            "prompt_tokens": 10,
                            "completion_tokens": 10,
                            "total_tokens": 20
                        }
                    }));
            })
            .await;

        let backend = OpenAiBackend::new(&mock_config(server.base_url())).unwrap();
        let text = backend
            .complete("system", "Respond with JSON only.")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(text, "{\"type\":\"pie\",\"labels\":[],\"values\":[]}");
    }

    #[tokio::test]
    async fn test_openai_rejection_exhausts_retries() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(400)
                    .header("content-type", "application/json")
                    .json_body(json!({
                        "error": {
                            "message": "bad request",
                            "type": "invalid_request_error",
                            "param": null,
                            "code": null
                        }
                    }));
            })
            .await;

        let backend = Arc::new(OpenAiBackend::new(&mock_config(server.base_url())).unwrap());
        let client = GenerativeClient::with_clock(
            backend,
            Arc::new(RecordingClock::default()),
            policy(),
        );

        let err = client.complete("p", "s").await.unwrap_err();
        assert!(matches!(err, RagError::GenerationUnavailable { attempts: 3, .. }));
        mock.assert_calls_async(3).await;
    }
}
