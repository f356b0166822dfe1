use anyhow::{Context, Result, anyhow};
use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Lines};
use std::time::Duration;
use tracing::debug;
use veil_llm::{
    ChatChunk, ChatMessage, ChatStream, Credentials, GenerateOptions, GenerateResponse,
    LanguageModel, ModelFactory, ProxyError,
};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const PROVIDER_NAME: &str = "openai";

#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

impl OpenAiCompatibleClient {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn from_env(model: &str) -> Result<Self> {
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY is required for OpenAI-compatible provider")?;

        Ok(Self::new(&base_url, &api_key, model))
    }

    fn send(&self, options: &GenerateOptions, stream: bool) -> Result<Response> {
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .context("failed to build HTTP client")?;
        let url = format!("{}/chat/completions", self.base_url);
        debug!(%url, model = %self.model, stream, "calling OpenAI-compatible endpoint");

        let response = client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&ChatRequest::new(&self.model, options, stream))
            .send()
            .context("failed calling OpenAI-compatible endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_else(|_| "<unavailable>".to_string());
            return Err(anyhow!(
                "OpenAI-compatible request failed ({status}): {body}"
            ));
        }
        Ok(response)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

impl<'a> ChatRequest<'a> {
    fn new(model: &'a str, options: &'a GenerateOptions, stream: bool) -> Self {
        Self {
            model,
            messages: &options.messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stream,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

impl LanguageModel for OpenAiCompatibleClient {
    fn provider(&self) -> &str {
        PROVIDER_NAME
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn generate(&self, options: &GenerateOptions) -> Result<GenerateResponse> {
        let parsed: ChatResponse = self
            .send(options, false)?
            .json()
            .context("failed to decode OpenAI-compatible response")?;
        let model = parsed.model.unwrap_or_else(|| self.model.clone());
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("OpenAI-compatible response had no choices"))?;

        Ok(GenerateResponse {
            content: choice.message.content.unwrap_or_default(),
            model,
            finish_reason: choice.finish_reason,
        })
    }

    fn stream(&self, options: &GenerateOptions) -> Result<ChatStream> {
        let response = self.send(options, true)?;
        Ok(Box::new(SseStream::new(BufReader::new(response))))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    Chunk(ChatChunk),
    Done,
}

/// Parses one server-sent-events line. Comments, blank lines and non-data
/// fields yield `None`.
fn parse_sse_line(line: &str) -> Result<Option<SseLine>> {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(Some(SseLine::Done));
    }

    let event: StreamEvent = serde_json::from_str(data)
        .with_context(|| format!("failed to decode OpenAI-compatible stream event: {data}"))?;
    let Some(choice) = event.choices.into_iter().next() else {
        return Ok(None);
    };
    Ok(Some(SseLine::Chunk(ChatChunk {
        delta: choice.delta.content.unwrap_or_default(),
        finish_reason: choice.finish_reason,
    })))
}

struct SseStream<R> {
    lines: Lines<R>,
    done: bool,
}

impl<R: BufRead> SseStream<R> {
    fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for SseStream<R> {
    type Item = Result<ChatChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let line = match self.lines.next() {
                Some(Ok(line)) => line,
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(err).context("failed reading OpenAI-compatible stream"));
                }
                None => {
                    self.done = true;
                    return None;
                }
            };

            match parse_sse_line(&line) {
                Ok(Some(SseLine::Chunk(chunk))) => {
                    if chunk.delta.is_empty() && chunk.finish_reason.is_none() {
                        continue;
                    }
                    return Some(Ok(chunk));
                }
                Ok(Some(SseLine::Done)) => self.done = true,
                Ok(None) => {}
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
        None
    }
}

/// Builds OpenAI-compatible clients. An API key is mandatory; the base URL
/// falls back to the public endpoint.
#[derive(Debug, Clone, Default)]
pub struct OpenAiFactory;

impl ModelFactory for OpenAiFactory {
    type Model = OpenAiCompatibleClient;

    fn provider_name(&self) -> &str {
        PROVIDER_NAME
    }

    fn requires_api_key(&self) -> bool {
        true
    }

    fn create(&self, credentials: &Credentials, upstream_model: &str) -> Result<Self::Model> {
        let api_key = credentials
            .api_key()
            .ok_or(ProxyError::MissingCredentials {
                provider: PROVIDER_NAME.to_string(),
                field: "api_key",
            })?;
        Ok(OpenAiCompatibleClient::new(
            credentials.base_url_or(DEFAULT_BASE_URL),
            api_key,
            upstream_model,
        ))
    }
}
