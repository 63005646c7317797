use std::env;
use std::pin::Pin;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::Serialize;

mod history;
mod stream;

pub use history::{ChatMessage, ConversationStore, Role, DEFAULT_SYSTEM_PROMPT};
pub use stream::StopSequenceFilter;

use stream::{parse_line, LineBuffer, StreamLine};

/// Default anti-prompt: the model starting the next user turn.
pub const DEFAULT_STOP_SEQUENCE: &str = "User:";

/// Generated text, token by token.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Ollama,
}

impl LlmProvider {
    /// Anything other than "ollama" selects OpenAI.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "ollama" => LlmProvider::Ollama,
            _ => LlmProvider::OpenAI,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::OpenAI => "gpt-4o-mini",
            LlmProvider::Ollama => "llama3",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::OpenAI => "https://api.openai.com/v1",
            LlmProvider::Ollama => "http://localhost:11434",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAI => "openai",
            LlmProvider::Ollama => "ollama",
        }
    }
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    stop: &'a [String],
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions<'a>,
}

#[derive(Serialize)]
struct OllamaOptions<'a> {
    stop: &'a [String],
}

pub struct LlmClient {
    provider: LlmProvider,
    model: String,
    base_url: String,
    api_key: Option<String>,
    stop_sequences: Vec<String>,
    client: Client,
}

impl LlmClient {
    /// Create a streaming client. OpenAI reads its key from `OPENAI_API_KEY`.
    pub fn new(provider: LlmProvider, model: &str) -> Result<Self> {
        let api_key = match provider {
            LlmProvider::OpenAI => Some(
                env::var("OPENAI_API_KEY")
                    .context("OPENAI_API_KEY must be set in the environment")?,
            ),
            LlmProvider::Ollama => None,
        };
        Self::with_api_key(provider, model, api_key)
    }

    pub fn with_api_key(provider: LlmProvider, model: &str, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;
        let model = if model.is_empty() {
            provider.default_model().to_string()
        } else {
            model.to_string()
        };
        Ok(Self {
            provider,
            model,
            base_url: provider.default_base_url().to_string(),
            api_key,
            stop_sequences: vec![DEFAULT_STOP_SEQUENCE.to_string()],
            client,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_stop_sequences(mut self, stops: Vec<String>) -> Self {
        self.stop_sequences = stops;
        self
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, messages: &[ChatMessage]) -> reqwest::RequestBuilder {
        match self.provider {
            LlmProvider::OpenAI => {
                let body = OpenAiRequest {
                    model: &self.model,
                    messages,
                    stream: true,
                    stop: &self.stop_sequences,
                };
                let request = self
                    .client
                    .post(format!("{}/chat/completions", self.base_url))
                    .json(&body);
                match &self.api_key {
                    Some(key) => request.bearer_auth(key),
                    None => request,
                }
            }
            LlmProvider::Ollama => {
                let body = OllamaRequest {
                    model: &self.model,
                    messages,
                    stream: true,
                    options: OllamaOptions {
                        stop: &self.stop_sequences,
                    },
                };
                self.client.post(format!("{}/api/chat", self.base_url)).json(&body)
            }
        }
    }

    /// Stream the reply to `messages` token by token. Generation ends at the
    /// end of the response or at the first stop sequence, whichever is first.
    pub fn stream_chat(&self, messages: &[ChatMessage]) -> TokenStream {
        let request = self.build_request(messages);
        let provider = self.provider;
        let stop = StopSequenceFilter::new(self.stop_sequences.clone());

        tracing::debug!(
            provider = provider.as_str(),
            model = %self.model,
            messages = messages.len(),
            "Starting chat stream"
        );

        Box::pin(token_stream(request, provider, stop))
    }
}

fn token_stream(
    request: reqwest::RequestBuilder,
    provider: LlmProvider,
    mut stop: StopSequenceFilter,
) -> impl Stream<Item = Result<String>> + Send {
    async_stream::try_stream! {
        let response = request.send().await?.error_for_status()?;
        let mut body = response.bytes_stream();
        let mut lines = LineBuffer::default();
        let mut finished = false;

        while !finished {
            let Some(chunk) = body.next().await else { break };
            let chunk = chunk?;
            for line in lines.push(&chunk) {
                match parse_line(provider, &line)? {
                    StreamLine::Token(token) => {
                        let (text, stopped) = stop.push(&token);
                        if !text.is_empty() {
                            yield text;
                        }
                        if stopped {
                            tracing::debug!("Stop sequence reached");
                            finished = true;
                            break;
                        }
                    }
                    StreamLine::Done => {
                        finished = true;
                        break;
                    }
                    StreamLine::Skip => {}
                }
            }
        }

        // A final line without a trailing newline
        if !finished {
            if let Some(line) = lines.finish() {
                if let StreamLine::Token(token) = parse_line(provider, &line)? {
                    let (text, _) = stop.push(&token);
                    if !text.is_empty() {
                        yield text;
                    }
                }
            }
        }

        let rest = stop.finish();
        if !rest.is_empty() {
            yield rest;
        }
    }
}
