use crate::persona::{PersonaCatalog, PersonaProfile, ProxyConfig};
use crate::rewrite::RewriteEngine;
use crate::stream::SanitizingStream;
use anyhow::{Result, bail};
use std::sync::Arc;
use tracing::debug;
use veil_llm::{
    ChatStream, Credentials, GenerateOptions, GenerateResponse, LanguageModel, ModelFactory,
    ProxyError,
};

/// Immutable proxy configuration: the persona catalog plus compiled rules.
#[derive(Debug, Clone)]
pub struct IdentityProxy {
    catalog: PersonaCatalog,
    engine: Arc<RewriteEngine>,
}

impl IdentityProxy {
    pub fn new(config: &ProxyConfig) -> Result<Self> {
        if config.brand.trim().is_empty() || config.creator.trim().is_empty() {
            bail!("brand and creator must not be empty");
        }
        if !(0.0..=2.0).contains(&config.identity_temperature) {
            bail!(
                "identity temperature {} is outside 0.0..=2.0",
                config.identity_temperature
            );
        }

        let catalog = PersonaCatalog::from_config(config)?;
        let engine = RewriteEngine::new(config)?;
        for persona in catalog.personas() {
            validate_persona(&engine, persona)?;
            validate_assurance_phrase(&engine, &config.assurance_phrase, persona)?;
        }

        Ok(Self {
            catalog,
            engine: Arc::new(engine),
        })
    }

    pub fn catalog(&self) -> &PersonaCatalog {
        &self.catalog
    }

    pub fn engine(&self) -> &RewriteEngine {
        &self.engine
    }

    pub fn persona(&self, model_key: &str) -> Result<&PersonaProfile, ProxyError> {
        self.catalog.persona(model_key)
    }

    /// Resolves the key, checks credentials, then asks the factory for the
    /// upstream client. Both checks run before the factory is touched.
    pub fn create_persona_model<F>(
        &self,
        model_key: &str,
        factory: &F,
        credentials: &Credentials,
    ) -> Result<PersonaModel<F::Model>>
    where
        F: ModelFactory,
    {
        let persona = self.catalog.shared_persona(model_key)?;
        let upstream_model = self.catalog.upstream_model(model_key)?;
        factory.validate_credentials(credentials)?;

        let inner = factory.create(credentials, upstream_model)?;
        debug!(
            persona = %persona.model_key,
            provider = factory.provider_name(),
            "persona model created"
        );

        Ok(PersonaModel {
            inner,
            persona,
            engine: Arc::clone(&self.engine),
        })
    }
}

fn validate_persona(engine: &RewriteEngine, persona: &PersonaProfile) -> Result<(), ProxyError> {
    let invalid = |reason: String| ProxyError::InvalidPersona {
        key: persona.model_key.clone(),
        reason,
    };

    for (field, value) in [
        ("brand", &persona.brand),
        ("creator", &persona.creator),
        ("display name", &persona.display_name),
        ("description", &persona.description),
        ("technical blurb", &persona.technical_blurb),
    ] {
        if engine.sanitizer().mentions_vendor(value) {
            return Err(invalid(format!("{field} '{value}' contains a denylisted vendor name")));
        }
    }

    let greeting = persona.greeting();
    if engine.sanitize_response(&greeting, persona) != greeting {
        return Err(invalid(
            "identity statement would itself be rewritten by sanitization".to_string(),
        ));
    }
    Ok(())
}

/// The assurance phrase is inserted after the vendor pass, so it has to be
/// clean on its own.
fn validate_assurance_phrase(
    engine: &RewriteEngine,
    phrase: &str,
    persona: &PersonaProfile,
) -> Result<()> {
    if engine.sanitizer().mentions_vendor(phrase) {
        bail!("assurance phrase '{phrase}' contains a denylisted vendor name");
    }
    if engine.sanitizer().sanitize_segment(phrase, persona, false) != phrase {
        bail!("assurance phrase '{phrase}' would itself be rewritten by sanitization");
    }
    Ok(())
}

/// Drop-in replacement for an upstream client that speaks as the persona.
pub struct PersonaModel<M> {
    inner: M,
    persona: Arc<PersonaProfile>,
    engine: Arc<RewriteEngine>,
}

impl<M> PersonaModel<M> {
    pub fn persona(&self) -> &PersonaProfile {
        &self.persona
    }
}

impl<M: LanguageModel> LanguageModel for PersonaModel<M> {
    fn provider(&self) -> &str {
        &self.persona.display_name
    }

    fn model_id(&self) -> &str {
        &self.persona.display_name
    }

    fn generate(&self, options: &GenerateOptions) -> Result<GenerateResponse> {
        let request = self.engine.rewrite_options(options, &self.persona);
        let response = self.inner.generate(&request)?;
        Ok(GenerateResponse {
            content: self.engine.sanitize_response(&response.content, &self.persona),
            model: self.persona.display_name.clone(),
            finish_reason: response.finish_reason,
        })
    }

    fn stream(&self, options: &GenerateOptions) -> Result<ChatStream> {
        let request = self.engine.rewrite_options(options, &self.persona);
        let upstream = self.inner.stream(&request)?;
        Ok(Box::new(SanitizingStream::new(
            upstream,
            Arc::clone(&self.engine),
            Arc::clone(&self.persona),
        )))
    }
}
