//! # Recommender
//!
//! Retrieval plus generation: the query is embedded, the nearest chunks are pulled
//! from the [`VectorStore`], a prompt is rendered from a [`PromptTemplate`] and one
//! chat completion is requested from an OpenAI-compatible endpoint.
//!
//! The chat call is a single attempt under a timeout. Errors, timeouts and empty
//! replies all surface as [`Error::Generation`].

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequestArgs,
    },
};
use std::future::Future;
use std::time::Duration;
use tiktoken_rs::{CoreBPE, cl100k_base};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::template::PromptTemplate;
use crate::vector_store::{ScoredChunk, VectorStore};

/// Queries shorter than this many characters (after trimming) are rejected.
pub const MIN_QUERY_CHARS: usize = 3;

/// A prompt ready for a chat model.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Hosted text generation.
pub trait Generator {
    fn generate(&self, prompt: &Prompt) -> impl Future<Output = Result<String>> + Send;
}

/// Chat completions against any OpenAI-compatible API (Groq by default).
pub struct OpenAiGenerator {
    client: Client<OpenAIConfig>,
    model: String,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
}

impl OpenAiGenerator {
    pub fn new(config: &AppConfig) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(config.api_key.clone())
            .with_api_base(config.api_base.clone());
        debug!("Client created for {}", config.api_base);
        Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    #[allow(deprecated)]
    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        let messages = vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: ChatCompletionRequestSystemMessageContent::Text(prompt.system.clone()),
                name: None,
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(prompt.user.clone()),
                name: None,
            }),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .max_tokens(self.max_tokens)
            .temperature(self.temperature)
            .messages(messages)
            .build()
            .map_err(|e| Error::Generation(e.to_string()))?;

        debug!("Sending request: {:?}", request);

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| Error::Generation(e.to_string()))?;

        let mut response_string = String::new();
        for choice in response.choices {
            if let Some(text) = choice.message.content {
                response_string.push_str(&text);
            }
        }
        Ok(response_string)
    }
}

impl Generator for OpenAiGenerator {
    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        match tokio::time::timeout(self.timeout, self.complete(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Generation(format!(
                "no response from {} within {:?}",
                self.model, self.timeout
            ))),
        }
    }
}

/// Retriever + generator pair answering free-text queries.
pub struct Recommender<G> {
    store: VectorStore,
    generator: G,
    template: PromptTemplate,
    top_k: usize,
    context_max_tokens: usize,
    bpe: CoreBPE,
}

impl<G: Generator> Recommender<G> {
    pub fn new(store: VectorStore, generator: G, template: PromptTemplate) -> Result<Self> {
        let bpe = cl100k_base().map_err(|e| Error::Config(format!("tokenizer: {e}")))?;
        Ok(Self {
            store,
            generator,
            template,
            top_k: 4,
            context_max_tokens: 3000,
            bpe,
        })
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_context_max_tokens(mut self, tokens: usize) -> Self {
        self.context_max_tokens = tokens;
        self
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Reject empty and too-short queries.
    pub fn validate_query(query: &str) -> Result<&str> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidQuery("query is empty".into()));
        }
        if trimmed.chars().count() < MIN_QUERY_CHARS {
            return Err(Error::InvalidQuery(format!(
                "query must be at least {MIN_QUERY_CHARS} characters"
            )));
        }
        Ok(trimmed)
    }

    /// Join retrieved chunk texts, best first, stopping before the token budget
    /// is exceeded. The best chunk is always kept.
    pub fn build_context(&self, hits: &[ScoredChunk]) -> String {
        let mut parts: Vec<&str> = Vec::new();
        let mut used = 0usize;
        for hit in hits {
            let tokens = self.bpe.encode_with_special_tokens(&hit.chunk.text).len();
            if !parts.is_empty() && used + tokens > self.context_max_tokens {
                warn!(
                    "Context budget of {} tokens reached, dropping {} chunks",
                    self.context_max_tokens,
                    hits.len() - parts.len()
                );
                break;
            }
            used += tokens;
            parts.push(&hit.chunk.text);
        }
        parts.join("\n\n")
    }

    /// Retrieve context for `query` and render the prompt, without calling the model.
    pub fn prepare_prompt(&self, query: &str) -> Result<Prompt> {
        let query = Self::validate_query(query)?;
        let hits = self.store.retrieve(query, self.top_k)?;
        debug!(
            "Retrieved {:?}",
            hits.iter().map(|h| (&h.chunk.title, h.distance)).collect::<Vec<_>>()
        );
        let context = self.build_context(&hits);
        Ok(Prompt {
            system: self.template.system_prompt.clone(),
            user: self.template.render_user_prompt(&context, query),
        })
    }

    /// Answer `query` with a natural-language recommendation.
    ///
    /// # Errors
    /// - [`Error::InvalidQuery`] for empty or too-short queries.
    /// - [`Error::Embedding`] if the query can't be embedded.
    /// - [`Error::Generation`] if the model call fails, times out or returns nothing.
    ///
    /// Query embedding is CPU-bound; on a multi-threaded runtime it runs under
    /// [`tokio::task::block_in_place`] so other tasks keep making progress.
    pub async fn get_recommendation(&self, query: &str) -> Result<String> {
        let prompt = match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| self.prepare_prompt(query))?
            }
            _ => self.prepare_prompt(query)?,
        };
        let answer = self.generator.generate(&prompt).await?;
        if answer.trim().is_empty() {
            return Err(Error::Generation("model returned an empty response".into()));
        }
        info!("Generated {} characters", answer.len());
        Ok(answer)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chunker::DocumentChunk;
    use crate::test_support::HashingEmbedder;
    use httpmock::prelude::*;
    use std::sync::{Arc, Mutex};

    /// Records prompts and answers with a canned reply.
    pub(crate) struct EchoGenerator {
        pub reply: String,
        pub seen: Arc<Mutex<Vec<Prompt>>>,
    }

    impl EchoGenerator {
        pub(crate) fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                seen: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl Generator for EchoGenerator {
        async fn generate(&self, prompt: &Prompt) -> Result<String> {
            self.seen.lock().unwrap().push(prompt.clone());
            Ok(self.reply.clone())
        }
    }

    pub(crate) fn small_store() -> VectorStore {
        let embedder = Arc::new(HashingEmbedder::new(256));
        let mut store = VectorStore::new(embedder.clone(), 1000);
        let texts = [
            ("Yuru Camp", "Title: Yuru Camp Overview: girls go camping. Genres: Slice of Life"),
            ("Berserk", "Title: Berserk Overview: a swordsman seeks revenge. Genres: Dark Fantasy"),
            ("Aria", "Title: Aria Overview: gondolas in a calm city. Genres: Slice of Life"),
        ];
        for (i, (title, text)) in texts.iter().enumerate() {
            let vector = store.embed_text_to_vector(text).unwrap();
            let chunk = DocumentChunk {
                id: 0,
                record_index: i,
                offset: 0,
                title: title.to_string(),
                text: text.to_string(),
            };
            store.add_vector_with_content(vector, chunk).unwrap();
        }
        store.build().unwrap();
        store
    }

    fn mock_config(server: &MockServer) -> AppConfig {
        AppConfig {
            api_key: "test-key".into(),
            api_base: server.base_url(),
            model: "test-model".into(),
            request_timeout_secs: 5,
            ..AppConfig::default()
        }
    }

    fn completion_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1_700_000_000,
            "model": "test-model",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
        })
    }

    #[test]
    fn test_validate_query() {
        assert!(matches!(
            Recommender::<EchoGenerator>::validate_query(""),
            Err(Error::InvalidQuery(_))
        ));
        assert!(matches!(
            Recommender::<EchoGenerator>::validate_query("  ab  "),
            Err(Error::InvalidQuery(_))
        ));
        assert_eq!(
            Recommender::<EchoGenerator>::validate_query(" mecha ").unwrap(),
            "mecha"
        );
    }

    #[tokio::test]
    async fn test_recommendation_uses_retrieved_context() {
        let generator = EchoGenerator::new("1. Yuru Camp");
        let seen = generator.seen.clone();
        let recommender = Recommender::new(small_store(), generator, PromptTemplate::default())
            .unwrap()
            .with_top_k(2);

        let answer = recommender.get_recommendation("slice of life").await.unwrap();
        assert_eq!(answer, "1. Yuru Camp");

        let prompts = seen.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].user.contains("slice of life"));
        assert!(prompts[0].user.contains("Genres: Slice of Life"));
        assert!(!prompts[0].user.contains("Berserk"));
    }

    #[tokio::test]
    async fn test_invalid_query_never_reaches_generator() {
        let generator = EchoGenerator::new("unused");
        let seen = generator.seen.clone();
        let recommender =
            Recommender::new(small_store(), generator, PromptTemplate::default()).unwrap();

        for query in ["", "ab"] {
            let result = recommender.get_recommendation(query).await;
            assert!(matches!(result, Err(Error::InvalidQuery(_))));
        }
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_reply_is_generation_error() {
        let recommender =
            Recommender::new(small_store(), EchoGenerator::new("  "), PromptTemplate::default())
                .unwrap();
        let result = recommender.get_recommendation("gondolas").await;
        assert!(matches!(result, Err(Error::Generation(_))));
    }

    #[test]
    fn test_context_budget_keeps_best_chunk() {
        let recommender =
            Recommender::new(small_store(), EchoGenerator::new(""), PromptTemplate::default())
                .unwrap()
                .with_context_max_tokens(1);
        let hits = recommender.store().retrieve("camping", 3).unwrap();
        let context = recommender.build_context(&hits);
        assert_eq!(context, hits[0].chunk.text);
    }

    #[tokio::test]
    async fn test_openai_generator_returns_message_content() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .header("authorization", "Bearer test-key")
                    .body_includes("\"model\":\"test-model\"");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(completion_body("Try Mushishi."));
            })
            .await;

        let generator = OpenAiGenerator::new(&mock_config(&server));
        let prompt = Prompt {
            system: "sys".into(),
            user: "calm anime".into(),
        };
        let answer = generator.generate(&prompt).await.unwrap();
        assert_eq!(answer, "Try Mushishi.");
        mock.assert_async().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_recommendation_on_multi_thread_runtime() {
        let generator = EchoGenerator::new("1. Aria");
        let seen = generator.seen.clone();
        let recommender =
            Recommender::new(small_store(), generator, PromptTemplate::default()).unwrap();

        let answer = recommender.get_recommendation("calm gondolas").await.unwrap();
        assert_eq!(answer, "1. Aria");
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_openai_generator_times_out() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200)
                    .header("content-type", "application/json")
                    .delay(Duration::from_secs(3))
                    .json_body(completion_body("too late"));
            })
            .await;

        let config = AppConfig {
            request_timeout_secs: 1,
            ..mock_config(&server)
        };
        let generator = OpenAiGenerator::new(&config);
        let prompt = Prompt {
            system: "sys".into(),
            user: "calm anime".into(),
        };
        let started = std::time::Instant::now();
        let result = generator.generate(&prompt).await;
        assert!(matches!(result, Err(Error::Generation(_))));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_openai_generator_maps_http_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(401)
                    .header("content-type", "application/json")
                    .json_body(serde_json::json!({
                        "error": { "message": "bad key", "type": "invalid_request_error", "param": null, "code": null }
                    }));
            })
            .await;

        let generator = OpenAiGenerator::new(&mock_config(&server));
        let prompt = Prompt {
            system: "sys".into(),
            user: "calm anime".into(),
        };
        let result = generator.generate(&prompt).await;
        assert!(matches!(result, Err(Error::Generation(_))));
    }
}
