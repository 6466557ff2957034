//! Chat model providers and the fragment stream they produce.
//!
//! Two providers, with `[chat] provider` as the default:
//!
//! | Provider | Endpoint | Streaming format |
//! |----------|----------|------------------|
//! | [`OllamaChat`] | `POST {url}/api/chat` | NDJSON, `message.content` per line |
//! | [`OpenAiChat`] | `POST {url}/v1/chat/completions` | SSE `data:` lines, `choices[0].delta.content` |
//!
//! Each request may pick its provider by prefixing the model identifier,
//! e.g. `openai:gpt-4o-mini` or `ollama:qwen2:7b`; see [`ChatRouter`].
//!
//! Streaming responses are read by a spawned task that forwards fragments
//! over a bounded channel. Dropping the [`FragmentStream`] aborts that task
//! and with it the HTTP request.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tagrag_core::models::ChatMessage;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::ChatConfig;

const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";
const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";

/// Ordered text fragments of one generation.
///
/// Yields `Err` at most once, as its last item, when the provider fails
/// mid-stream.
#[derive(Debug)]
pub struct FragmentStream {
    inner: ReceiverStream<Result<String>>,
    producer: Option<JoinHandle<()>>,
}

impl FragmentStream {
    /// Run `producer` on a new task, feeding a channel of `buffer` slots.
    pub fn spawn<F, Fut>(buffer: usize, producer: F) -> Self
    where
        F: FnOnce(mpsc::Sender<Result<String>>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let handle = tokio::spawn(producer(tx));
        Self {
            inner: ReceiverStream::new(rx),
            producer: Some(handle),
        }
    }

    /// A finished stream over fixed fragments.
    pub fn from_fragments<I>(fragments: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let fragments: Vec<String> = fragments.into_iter().collect();
        let (tx, rx) = mpsc::channel(fragments.len().max(1));
        for fragment in fragments {
            // Capacity covers every fragment
            let _ = tx.try_send(Ok(fragment));
        }
        Self {
            inner: ReceiverStream::new(rx),
            producer: None,
        }
    }

    /// Drain the stream into one string, stopping at the first error.
    pub async fn collect_text(mut self) -> Result<String> {
        let mut out = String::new();
        while let Some(fragment) = self.next().await {
            out.push_str(&fragment?);
        }
        Ok(out)
    }
}

impl Stream for FragmentStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for FragmentStream {
    fn drop(&mut self) {
        if let Some(handle) = self.producer.take() {
            handle.abort();
        }
    }
}

/// Stream returned by the streaming query operations.
pub type ResponseStream = FragmentStream;

/// A chat-completion backend. The model identifier is chosen per call.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate a complete reply.
    async fn generate(&self, model: &str, messages: &[ChatMessage]) -> Result<String>;

    /// Start a streaming reply. Connection and HTTP status failures are
    /// returned here; failures after the first byte arrive in the stream.
    async fn generate_stream(&self, model: &str, messages: Vec<ChatMessage>)
        -> Result<FragmentStream>;
}

/// One parsed line of a streaming response.
#[derive(Debug, Default, PartialEq)]
struct LineEvent {
    fragment: Option<String>,
    done: bool,
}

type LineParser = fn(&str) -> Result<LineEvent>;

/// Shared HTTP plumbing for both providers.
struct ChatEndpoint {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    timeout: Duration,
    stream_buffer: usize,
}

impl ChatEndpoint {
    fn new(config: &ChatConfig, url: String, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url,
            api_key,
            timeout: Duration::from_secs(config.timeout_secs),
            stream_buffer: config.stream_buffer,
        })
    }

    async fn send(&self, body: &serde_json::Value, whole: bool) -> Result<reqwest::Response> {
        let mut request = self.client.post(&self.url).json(body);
        if whole {
            request = request.timeout(self.timeout);
        }
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("Chat request to {} failed", self.url))?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Chat API error {}: {}", status, body_text);
        }
        Ok(response)
    }

    async fn complete(&self, body: serde_json::Value) -> Result<serde_json::Value> {
        self.send(&body, true)
            .await?
            .json()
            .await
            .context("Invalid chat response body")
    }

    async fn stream(&self, body: serde_json::Value, parse: LineParser) -> Result<FragmentStream> {
        let response = self.send(&body, false).await?;
        Ok(FragmentStream::spawn(self.stream_buffer, move |tx| {
            forward_lines(response, parse, tx)
        }))
    }
}

/// Read the response body line by line, forwarding parsed fragments until
/// the provider signals completion or the receiver goes away.
async fn forward_lines(response: reqwest::Response, parse: LineParser, tx: mpsc::Sender<Result<String>>) {
    let mut body = response.bytes_stream();
    let mut pending: Vec<u8> = Vec::new();

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = tx.send(Err(anyhow!(e).context("Chat stream interrupted"))).await;
                return;
            }
        };
        pending.extend_from_slice(&chunk);
        for line in drain_lines(&mut pending) {
            if !forward_line(&line, parse, &tx).await {
                return;
            }
        }
    }

    let rest = String::from_utf8_lossy(&pending).into_owned();
    forward_line(&rest, parse, &tx).await;
}

/// Split complete lines off the front of `pending`. Bytes are kept until a
/// newline arrives so multi-byte characters are never cut.
fn drain_lines(pending: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
        let line: Vec<u8> = pending.drain(..=pos).collect();
        lines.push(String::from_utf8_lossy(&line).into_owned());
    }
    lines
}

/// Returns `false` when forwarding should stop.
async fn forward_line(line: &str, parse: LineParser, tx: &mpsc::Sender<Result<String>>) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return true;
    }
    match parse(line) {
        Ok(event) => {
            if let Some(fragment) = event.fragment.filter(|f| !f.is_empty()) {
                if tx.send(Ok(fragment)).await.is_err() {
                    return false;
                }
            }
            !event.done
        }
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            false
        }
    }
}

// ============ Ollama ============

/// Chat via a local Ollama instance.
pub struct OllamaChat {
    endpoint: ChatEndpoint,
}

impl OllamaChat {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let base = config.url.as_deref().unwrap_or(OLLAMA_DEFAULT_URL);
        let url = format!("{}/api/chat", base.trim_end_matches('/'));
        Ok(Self {
            endpoint: ChatEndpoint::new(config, url, None)?,
        })
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    async fn generate(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        let body = serde_json::json!({"model": model, "messages": messages, "stream": false});
        let json = self.endpoint.complete(body).await?;
        ollama_error(&json)?;
        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Invalid Ollama response: missing message.content"))
    }

    async fn generate_stream(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<FragmentStream> {
        let body = serde_json::json!({"model": model, "messages": messages, "stream": true});
        self.endpoint.stream(body, parse_ollama_line).await
    }
}

fn ollama_error(json: &serde_json::Value) -> Result<()> {
    match json.get("error").and_then(|e| e.as_str()) {
        Some(message) => bail!("Ollama error: {}", message),
        None => Ok(()),
    }
}

fn parse_ollama_line(line: &str) -> Result<LineEvent> {
    let json: serde_json::Value =
        serde_json::from_str(line).with_context(|| format!("Invalid Ollama stream line: {}", line))?;
    ollama_error(&json)?;
    Ok(LineEvent {
        fragment: json
            .pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string),
        done: json.get("done").and_then(|d| d.as_bool()).unwrap_or(false),
    })
}

// ============ OpenAI ============

/// Chat via the OpenAI chat completions API. Requires `OPENAI_API_KEY`.
pub struct OpenAiChat {
    endpoint: ChatEndpoint,
}

impl OpenAiChat {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let base = config.url.as_deref().unwrap_or(OPENAI_DEFAULT_URL);
        let url = format!("{}/v1/chat/completions", base.trim_end_matches('/'));
        Ok(Self {
            endpoint: ChatEndpoint::new(config, url, Some(api_key))?,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn generate(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        let body = serde_json::json!({"model": model, "messages": messages, "stream": false});
        let json = self.endpoint.complete(body).await?;
        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
    }

    async fn generate_stream(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<FragmentStream> {
        let body = serde_json::json!({"model": model, "messages": messages, "stream": true});
        self.endpoint.stream(body, parse_openai_line).await
    }
}

fn parse_openai_line(line: &str) -> Result<LineEvent> {
    // SSE comments and non-data fields carry nothing
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(LineEvent::default());
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(LineEvent {
            fragment: None,
            done: true,
        });
    }
    let json: serde_json::Value =
        serde_json::from_str(data).with_context(|| format!("Invalid OpenAI stream event: {}", data))?;
    if let Some(message) = json.pointer("/error/message").and_then(|m| m.as_str()) {
        bail!("OpenAI error: {}", message);
    }
    Ok(LineEvent {
        fragment: json
            .pointer("/choices/0/delta/content")
            .and_then(|c| c.as_str())
            .map(str::to_string),
        done: false,
    })
}

/// Provider names accepted as a model prefix.
pub const CHAT_PROVIDERS: &[&str] = &["ollama", "openai"];

/// Routes each request to a provider chosen by the model identifier.
///
/// `provider:model` goes to `provider` when it is one of
/// [`CHAT_PROVIDERS`]; anything else, including Ollama tags such as
/// `llama3:8b`, goes to the default provider unchanged.
pub struct ChatRouter {
    default: String,
    providers: HashMap<String, Arc<dyn ChatModel>>,
    unavailable: HashMap<String, String>,
}

impl ChatRouter {
    pub fn new(default: impl Into<String>, model: Arc<dyn ChatModel>) -> Self {
        let default = default.into();
        let mut providers = HashMap::new();
        providers.insert(default.clone(), model);
        Self {
            default,
            providers,
            unavailable: HashMap::new(),
        }
    }

    pub fn with_provider(mut self, name: impl Into<String>, model: Arc<dyn ChatModel>) -> Self {
        let name = name.into();
        self.unavailable.remove(&name);
        self.providers.insert(name, model);
        self
    }

    /// Remember why `name` could not be built, for the error a request
    /// naming it will get.
    pub fn with_unavailable(mut self, name: impl Into<String>, reason: impl Into<String>) -> Self {
        self.unavailable.insert(name.into(), reason.into());
        self
    }

    fn route<'m>(&self, model: &'m str) -> Result<(&dyn ChatModel, &'m str)> {
        let (provider, model) = match model.split_once(':') {
            Some((prefix, rest)) if CHAT_PROVIDERS.contains(&prefix) => {
                if rest.trim().is_empty() {
                    bail!("model name missing after '{}:'", prefix);
                }
                (prefix, rest)
            }
            _ => (self.default.as_str(), model),
        };
        match self.providers.get(provider) {
            Some(chat) => Ok((chat.as_ref(), model)),
            None => match self.unavailable.get(provider) {
                Some(reason) => bail!("chat provider '{}' is not available: {}", provider, reason),
                None => bail!("chat provider '{}' is not available", provider),
            },
        }
    }
}

#[async_trait]
impl ChatModel for ChatRouter {
    async fn generate(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        let (chat, model) = self.route(model)?;
        chat.generate(model, messages).await
    }

    async fn generate_stream(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<FragmentStream> {
        let (chat, model) = self.route(model)?;
        chat.generate_stream(model, messages).await
    }
}

fn build_provider(name: &str, config: &ChatConfig) -> Result<Arc<dyn ChatModel>> {
    match name {
        "ollama" => Ok(Arc::new(OllamaChat::new(config)?)),
        "openai" => Ok(Arc::new(OpenAiChat::new(config)?)),
        other => bail!("Unknown chat provider: {}", other),
    }
}

/// Build a [`ChatRouter`] over the configured default provider plus every
/// other provider that can be set up from its defaults.
///
/// `[chat] url` applies to the default provider only.
pub fn create_chat_model(config: &ChatConfig) -> Result<Arc<dyn ChatModel>> {
    let default = build_provider(&config.provider, config)?;
    let mut router = ChatRouter::new(config.provider.clone(), default);

    for name in CHAT_PROVIDERS.iter().copied().filter(|n| *n != config.provider) {
        let alternate = ChatConfig {
            provider: name.to_string(),
            url: None,
            ..config.clone()
        };
        router = match build_provider(name, &alternate) {
            Ok(chat) => router.with_provider(name, chat),
            Err(e) => {
                tracing::debug!(provider = name, error = %e, "chat provider unavailable");
                router.with_unavailable(name, e.to_string())
            }
        };
    }
    Ok(Arc::new(router))
}
