use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GenerateOptions {
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl GenerateOptions {
    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateResponse {
    pub content: String,
    pub model: String,
    pub finish_reason: Option<String>,
}

/// One incremental piece of a streamed completion.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatChunk {
    pub delta: String,
    pub finish_reason: Option<String>,
}

impl ChatChunk {
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            delta: delta.into(),
            finish_reason: None,
        }
    }
}

/// Blocking sequence of chunks. Dropping it abandons the underlying response.
pub type ChatStream = Box<dyn Iterator<Item = Result<ChatChunk>> + Send>;

/// Invocation surface shared by upstream clients and the persona wrapper.
pub trait LanguageModel {
    fn provider(&self) -> &str;
    fn model_id(&self) -> &str;
    fn generate(&self, options: &GenerateOptions) -> Result<GenerateResponse>;
    fn stream(&self, options: &GenerateOptions) -> Result<ChatStream>;
}

impl<M: LanguageModel + ?Sized> LanguageModel for Box<M> {
    fn provider(&self) -> &str {
        (**self).provider()
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    fn generate(&self, options: &GenerateOptions) -> Result<GenerateResponse> {
        (**self).generate(options)
    }

    fn stream(&self, options: &GenerateOptions) -> Result<ChatStream> {
        (**self).stream(options)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl Credentials {
    pub fn new(api_key: Option<String>, base_url: Option<String>) -> Self {
        Self { api_key, base_url }
    }

    /// API key, treating a blank value as absent.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    pub fn base_url_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .unwrap_or(fallback)
    }
}

pub trait ModelFactory {
    type Model: LanguageModel;

    fn provider_name(&self) -> &str;
    fn requires_api_key(&self) -> bool;
    fn create(&self, credentials: &Credentials, upstream_model: &str) -> Result<Self::Model>;

    fn validate_credentials(&self, credentials: &Credentials) -> Result<(), ProxyError> {
        if self.requires_api_key() && credentials.api_key().is_none() {
            return Err(ProxyError::MissingCredentials {
                provider: self.provider_name().to_string(),
                field: "api_key",
            });
        }
        Ok(())
    }
}

/// Configuration failures owned by the proxy. Upstream failures are never
/// wrapped in this type.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProxyError {
    #[error("unknown model key '{key}' (available: {})", known.join(", "))]
    UnknownModel { key: String, known: Vec<String> },
    #[error("{provider} requires an {field}, but none was supplied")]
    MissingCredentials {
        provider: String,
        field: &'static str,
    },
    #[error("persona '{key}' is invalid: {reason}")]
    InvalidPersona { key: String, reason: String },
}

/// Drains a stream into a single string, stopping at the first error.
pub fn collect_stream(stream: ChatStream) -> Result<String> {
    let mut out = String::new();
    for chunk in stream {
        out.push_str(&chunk?.delta);
    }
    Ok(out)
}
