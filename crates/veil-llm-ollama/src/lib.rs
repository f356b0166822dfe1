use anyhow::{Context, Result, anyhow};
use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Lines};
use std::time::Duration;
use tracing::debug;
use veil_llm::{
    ChatChunk, ChatMessage, ChatStream, Credentials, GenerateOptions, GenerateResponse,
    LanguageModel, ModelFactory,
};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";
pub const PROVIDER_NAME: &str = "ollama";

#[derive(Clone)]
pub struct OllamaClient {
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn is_reachable(&self) -> bool {
        let client = match Client::builder().timeout(Duration::from_secs(2)).build() {
            Ok(c) => c,
            Err(_) => return false,
        };

        let url = format!("{}/api/tags", self.base_url);
        client
            .get(url)
            .send()
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn send(&self, options: &GenerateOptions, stream: bool) -> Result<Response> {
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .context("failed to build HTTP client")?;
        let url = format!("{}/api/chat", self.base_url);
        debug!(%url, model = %self.model, stream, "calling Ollama");

        let response = client
            .post(url)
            .json(&ChatRequest::new(&self.model, options, stream))
            .send()
            .context("failed calling Ollama")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_else(|_| "<unavailable>".to_string());
            return Err(anyhow!("Ollama request failed ({status}): {body}"));
        }
        Ok(response)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "SamplingOptions::is_empty")]
    options: SamplingOptions,
}

impl<'a> ChatRequest<'a> {
    fn new(model: &'a str, options: &'a GenerateOptions, stream: bool) -> Self {
        Self {
            model,
            messages: &options.messages,
            stream,
            options: SamplingOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct SamplingOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

impl SamplingOptions {
    fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.num_predict.is_none()
    }
}

/// Shape shared by the single response and every NDJSON stream line.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    message: Option<ResponseMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

impl ChatResponse {
    fn into_chunk(self) -> Result<ChatChunk> {
        if let Some(error) = self.error {
            return Err(anyhow!("Ollama stream failed: {error}"));
        }
        let finish_reason = if self.done {
            Some(self.done_reason.unwrap_or_else(|| "stop".to_string()))
        } else {
            None
        };
        Ok(ChatChunk {
            delta: self.message.map(|m| m.content).unwrap_or_default(),
            finish_reason,
        })
    }
}

impl LanguageModel for OllamaClient {
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
            .context("failed to decode Ollama response")?;
        let model = parsed.model.clone().unwrap_or_else(|| self.model.clone());
        let chunk = parsed.into_chunk()?;

        Ok(GenerateResponse {
            content: chunk.delta,
            model,
            finish_reason: chunk.finish_reason,
        })
    }

    fn stream(&self, options: &GenerateOptions) -> Result<ChatStream> {
        let response = self.send(options, true)?;
        Ok(Box::new(NdjsonStream::new(BufReader::new(response))))
    }
}

/// One JSON object per line until an object with `done: true`.
struct NdjsonStream<R> {
    lines: Lines<R>,
    done: bool,
}

impl<R: BufRead> NdjsonStream<R> {
    fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for NdjsonStream<R> {
    type Item = Result<ChatChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let line = match self.lines.next() {
                Some(Ok(line)) => line,
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(err).context("failed reading Ollama stream"));
                }
                None => {
                    self.done = true;
                    return None;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let chunk = serde_json::from_str::<ChatResponse>(&line)
                .with_context(|| format!("failed to decode Ollama stream line: {line}"))
                .and_then(ChatResponse::into_chunk);
            match chunk {
                Ok(chunk) => {
                    if chunk.finish_reason.is_some() {
                        self.done = true;
                    } else if chunk.delta.is_empty() {
                        continue;
                    }
                    return Some(Ok(chunk));
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
        None
    }
}

/// Builds clients for a local Ollama server. No API key is needed.
#[derive(Debug, Clone, Default)]
pub struct OllamaFactory;

impl ModelFactory for OllamaFactory {
    type Model = OllamaClient;

    fn provider_name(&self) -> &str {
        PROVIDER_NAME
    }

    fn requires_api_key(&self) -> bool {
        false
    }

    fn create(&self, credentials: &Credentials, upstream_model: &str) -> Result<Self::Model> {
        Ok(OllamaClient::new(
            credentials.base_url_or(DEFAULT_BASE_URL),
            upstream_model,
        ))
    }
}
