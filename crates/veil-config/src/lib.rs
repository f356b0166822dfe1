use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use veil_persona::{PersonaSpec, ProxyConfig};

pub const CONFIG_FILE_NAME: &str = "veil.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderSetting {
    Openai,
    Ollama,
}

impl ProviderSetting {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderSetting::Openai => "openai",
            ProviderSetting::Ollama => "ollama",
        }
    }
}

/// One persona as written in `veil.json`, keyed by model key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersonaEntry {
    pub display_name: Option<String>,
    pub description: String,
    pub technical_blurb: String,
    pub upstream_model: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub provider: Option<ProviderSetting>,
    pub model: Option<String>,
    pub openai_base_url: Option<String>,
    pub ollama_url: Option<String>,
    pub brand: Option<String>,
    pub creator: Option<String>,
    pub personas: Option<BTreeMap<String, PersonaEntry>>,
    pub vendor_denylist: Option<Vec<String>>,
    pub assurance_phrase: Option<String>,
    pub identity_temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnvConfig {
    pub provider: Option<ProviderSetting>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub openai_base_url: Option<String>,
    pub openai_api_key: Option<String>,
    pub ollama_url: Option<String>,
    pub identity_temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliOverrides {
    pub provider: Option<ProviderSetting>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunDefaults {
    pub provider: ProviderSetting,
    /// Persona model key, not an upstream model id.
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub proxy: ProxyConfig,
}

const DEFAULT_MODEL_KEY: &str = "fast";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// `<config_dir>/veil/veil.json`, when the platform has a config directory.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("veil").join(CONFIG_FILE_NAME))
}

/// Explicit path first (must exist), then `./veil.json`, then the user config
/// directory. Missing implicit files are not an error.
pub fn load_file_config(explicit_path: Option<&Path>, cwd: &Path) -> Result<Option<FileConfig>> {
    let path = match explicit_path {
        Some(p) => p.to_path_buf(),
        None => {
            let candidates = [Some(cwd.join(CONFIG_FILE_NAME)), user_config_path()];
            match candidates.into_iter().flatten().find(|p| p.exists()) {
                Some(p) => p,
                None => return Ok(None),
            }
        }
    };

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed reading config file {}", path.display()))?;
    let parsed: FileConfig = serde_json::from_str(&raw)
        .with_context(|| format!("failed parsing config file {}", path.display()))?;
    Ok(Some(parsed))
}

impl EnvConfig {
    pub fn from_current_env() -> Self {
        Self {
            provider: env::var("VEIL_PROVIDER")
                .ok()
                .and_then(|v| parse_provider(&v)),
            model: non_empty(env::var("VEIL_MODEL").ok()),
            base_url: non_empty(env::var("VEIL_BASE_URL").ok()),
            openai_base_url: non_empty(env::var("OPENAI_BASE_URL").ok()),
            openai_api_key: non_empty(env::var("OPENAI_API_KEY").ok()),
            ollama_url: non_empty(env::var("VEIL_OLLAMA_URL").ok()),
            identity_temperature: env::var("VEIL_TEMPERATURE")
                .ok()
                .and_then(|v| parse_temperature(&v)),
        }
    }
}

pub fn resolve_run_defaults(
    cli: &CliOverrides,
    env_cfg: &EnvConfig,
    file_cfg: Option<&FileConfig>,
) -> RunDefaults {
    let provider = cli
        .provider
        .or(env_cfg.provider)
        .or(file_cfg.and_then(|c| c.provider))
        .unwrap_or(ProviderSetting::Openai);

    let model = cli
        .model
        .clone()
        .or_else(|| env_cfg.model.clone())
        .or_else(|| file_cfg.and_then(|c| c.model.clone()))
        .unwrap_or_else(|| DEFAULT_MODEL_KEY.to_string());

    let provider_url = match provider {
        ProviderSetting::Openai => env_cfg
            .openai_base_url
            .clone()
            .or_else(|| file_cfg.and_then(|c| c.openai_base_url.clone()))
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
        ProviderSetting::Ollama => env_cfg
            .ollama_url
            .clone()
            .or_else(|| file_cfg.and_then(|c| c.ollama_url.clone()))
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
    };
    let base_url = env_cfg.base_url.clone().unwrap_or(provider_url);

    let api_key = match provider {
        ProviderSetting::Openai => env_cfg.openai_api_key.clone(),
        ProviderSetting::Ollama => None,
    };

    RunDefaults {
        provider,
        model,
        base_url,
        api_key,
        proxy: resolve_proxy_config(env_cfg, file_cfg),
    }
}

/// Persona catalog and rewrite settings. File personas replace the built-in
/// catalog entirely.
pub fn resolve_proxy_config(env_cfg: &EnvConfig, file_cfg: Option<&FileConfig>) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    if let Some(file) = file_cfg {
        if let Some(brand) = &file.brand {
            config.brand = brand.clone();
        }
        if let Some(creator) = &file.creator {
            config.creator = creator.clone();
        }
        if let Some(personas) = &file.personas {
            config.personas = personas
                .iter()
                .map(|(key, entry)| PersonaSpec {
                    model_key: key.clone(),
                    display_name: entry.display_name.clone(),
                    description: entry.description.clone(),
                    technical_blurb: entry.technical_blurb.clone(),
                    upstream_model: entry.upstream_model.clone(),
                })
                .collect();
        }
        if let Some(denylist) = &file.vendor_denylist {
            config.vendor_denylist = denylist.clone();
        }
        if let Some(phrase) = &file.assurance_phrase {
            config.assurance_phrase = phrase.clone();
        }
    }

    if let Some(temperature) = env_cfg
        .identity_temperature
        .or(file_cfg.and_then(|c| c.identity_temperature))
    {
        config.identity_temperature = temperature;
    }
    config
}

pub fn parse_provider(input: &str) -> Option<ProviderSetting> {
    match input.trim().to_ascii_lowercase().as_str() {
        "openai" | "openai-compatible" => Some(ProviderSetting::Openai),
        "ollama" => Some(ProviderSetting::Ollama),
        _ => None,
    }
}

fn parse_temperature(input: &str) -> Option<f32> {
    input.trim().parse().ok()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
