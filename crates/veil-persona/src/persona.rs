use std::collections::BTreeMap;
use std::sync::Arc;
use veil_llm::ProxyError;

pub const DEFAULT_BRAND: &str = "Nova";
pub const DEFAULT_CREATOR: &str = "Nova Labs";
pub const DEFAULT_ASSURANCE_PHRASE: &str = "helpful, precise, and reliable";

/// Low temperature keeps identity answers stable at the cost of creative
/// variance. Callers that need creative output should raise it explicitly.
pub const DEFAULT_IDENTITY_TEMPERATURE: f32 = 0.1;

/// The synthetic identity presented to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaProfile {
    pub model_key: String,
    pub display_name: String,
    pub description: String,
    pub technical_blurb: String,
    pub brand: String,
    pub creator: String,
}

impl PersonaProfile {
    /// Short first-person sentence used wherever output is rewritten.
    pub fn self_identification(&self) -> String {
        format!(
            "I am {}, a proprietary AI model created by {}.",
            self.display_name, self.creator
        )
    }

    pub fn identity_statement(&self) -> String {
        format!(
            "{} I am {}, {}.",
            self.self_identification(),
            self.description,
            self.technical_blurb
        )
    }

    pub fn greeting(&self) -> String {
        format!("Hello! {}", self.identity_statement())
    }
}

/// Input definition of one persona and the upstream model behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaSpec {
    pub model_key: String,
    pub display_name: Option<String>,
    pub description: String,
    pub technical_blurb: String,
    pub upstream_model: String,
}

impl PersonaSpec {
    pub fn new(
        model_key: &str,
        description: &str,
        technical_blurb: &str,
        upstream_model: &str,
    ) -> Self {
        Self {
            model_key: model_key.to_string(),
            display_name: None,
            description: description.to_string(),
            technical_blurb: technical_blurb.to_string(),
            upstream_model: upstream_model.to_string(),
        }
    }

    pub fn with_display_name(mut self, display_name: &str) -> Self {
        self.display_name = Some(display_name.to_string());
        self
    }
}

/// Everything the proxy needs, fixed at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyConfig {
    pub brand: String,
    pub creator: String,
    pub personas: Vec<PersonaSpec>,
    pub vendor_denylist: Vec<String>,
    pub assurance_phrase: String,
    pub identity_temperature: f32,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            brand: DEFAULT_BRAND.to_string(),
            creator: DEFAULT_CREATOR.to_string(),
            personas: default_personas(),
            vendor_denylist: default_vendor_denylist(),
            assurance_phrase: DEFAULT_ASSURANCE_PHRASE.to_string(),
            identity_temperature: DEFAULT_IDENTITY_TEMPERATURE,
        }
    }
}

pub fn default_personas() -> Vec<PersonaSpec> {
    vec![
        PersonaSpec::new(
            "fast",
            "a fast and efficient model optimized for quick responses",
            "using a streamlined proprietary architecture",
            "gpt-4o-mini",
        ),
        PersonaSpec::new(
            "balanced",
            "a versatile model balancing speed and depth",
            "using a hybrid proprietary architecture tuned for software engineering",
            "gpt-4o",
        ),
        PersonaSpec::new(
            "ultimate",
            "the most capable model in the lineup, built for complex reasoning",
            "using a large-scale proprietary architecture with extended context",
            "gpt-4.1",
        ),
    ]
}

pub fn default_vendor_denylist() -> Vec<String> {
    [
        "OpenAI",
        "ChatGPT",
        "GPT-4o",
        "GPT-4",
        "GPT-3.5",
        "GPT",
        "Anthropic",
        "Claude",
        "Google DeepMind",
        "DeepMind",
        "Gemini",
        "LLaMA",
        "Mistral",
        "Mixtral",
        "DeepSeek",
        "Qwen",
    ]
    .into_iter()
    .map(ToString::to_string)
    .collect()
}

/// `brand` + capitalised key, e.g. "Nova Fast".
pub fn default_display_name(brand: &str, model_key: &str) -> String {
    let mut chars = model_key.chars();
    let key = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
        None => String::new(),
    };
    format!("{brand} {key}")
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    persona: Arc<PersonaProfile>,
    upstream_model: String,
}

/// Model mapping: each key resolves to exactly one persona and one upstream id.
#[derive(Debug, Clone, Default)]
pub struct PersonaCatalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl PersonaCatalog {
    pub fn from_config(config: &ProxyConfig) -> Result<Self, ProxyError> {
        let mut entries = BTreeMap::new();
        for spec in &config.personas {
            let key = spec.model_key.trim();
            if key.is_empty() {
                return Err(ProxyError::InvalidPersona {
                    key: spec.model_key.clone(),
                    reason: "model key must not be empty".to_string(),
                });
            }
            if spec.upstream_model.trim().is_empty() {
                return Err(ProxyError::InvalidPersona {
                    key: key.to_string(),
                    reason: "upstream model must not be empty".to_string(),
                });
            }
            if entries.contains_key(key) {
                return Err(ProxyError::InvalidPersona {
                    key: key.to_string(),
                    reason: "model key is defined more than once".to_string(),
                });
            }

            let display_name = spec
                .display_name
                .clone()
                .unwrap_or_else(|| default_display_name(&config.brand, key));
            let persona = PersonaProfile {
                model_key: key.to_string(),
                display_name,
                description: spec.description.trim().to_string(),
                technical_blurb: spec.technical_blurb.trim().to_string(),
                brand: config.brand.clone(),
                creator: config.creator.clone(),
            };
            entries.insert(
                key.to_string(),
                CatalogEntry {
                    persona: Arc::new(persona),
                    upstream_model: spec.upstream_model.trim().to_string(),
                },
            );
        }

        Ok(Self { entries })
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn personas(&self) -> impl Iterator<Item = &PersonaProfile> {
        self.entries.values().map(|entry| entry.persona.as_ref())
    }

    pub fn persona(&self, model_key: &str) -> Result<&PersonaProfile, ProxyError> {
        self.entry(model_key).map(|entry| entry.persona.as_ref())
    }

    pub fn upstream_model(&self, model_key: &str) -> Result<&str, ProxyError> {
        self.entry(model_key).map(|entry| entry.upstream_model.as_str())
    }

    pub(crate) fn shared_persona(&self, model_key: &str) -> Result<Arc<PersonaProfile>, ProxyError> {
        self.entry(model_key).map(|entry| Arc::clone(&entry.persona))
    }

    fn entry(&self, model_key: &str) -> Result<&CatalogEntry, ProxyError> {
        self.entries
            .get(model_key.trim())
            .ok_or_else(|| ProxyError::UnknownModel {
                key: model_key.to_string(),
                known: self.keys(),
            })
    }
}
