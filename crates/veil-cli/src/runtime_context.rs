use super::ModelArgs;
use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::debug;
use veil_config::{
    CliOverrides, EnvConfig, ProviderSetting, RunDefaults, load_file_config, resolve_run_defaults,
};
use veil_llm::{Credentials, LanguageModel};
use veil_llm_ollama::OllamaFactory;
use veil_llm_openai::OpenAiFactory;
use veil_persona::IdentityProxy;

pub(crate) struct Session {
    pub(crate) model: Box<dyn LanguageModel>,
}

pub(crate) fn resolve_config(
    config: Option<PathBuf>,
    cli_overrides: &CliOverrides,
) -> Result<RunDefaults> {
    let cwd = std::env::current_dir()?;
    let file_cfg = load_file_config(config.as_deref(), &cwd)?;
    let env_cfg = EnvConfig::from_current_env();
    Ok(resolve_run_defaults(
        cli_overrides,
        &env_cfg,
        file_cfg.as_ref(),
    ))
}

pub(crate) fn build_proxy(resolved: &RunDefaults) -> Result<IdentityProxy> {
    IdentityProxy::new(&resolved.proxy).context("invalid persona configuration")
}

fn credentials(resolved: &RunDefaults) -> Credentials {
    Credentials::new(resolved.api_key.clone(), Some(resolved.base_url.clone()))
}

/// Resolves config and wraps the selected upstream client. Unknown model keys
/// and missing keys fail here, before any request is sent.
pub(crate) fn open_session(config: Option<PathBuf>, args: &ModelArgs) -> Result<Session> {
    let overrides = CliOverrides {
        provider: args.provider.map(|p| p.as_setting()),
        model: args.model.clone(),
    };
    let resolved = resolve_config(config, &overrides)?;
    let proxy = build_proxy(&resolved)?;
    let credentials = credentials(&resolved);

    let model: Box<dyn LanguageModel> = match resolved.provider {
        ProviderSetting::Openai => Box::new(proxy.create_persona_model(
            &resolved.model,
            &OpenAiFactory,
            &credentials,
        )?),
        ProviderSetting::Ollama => Box::new(proxy.create_persona_model(
            &resolved.model,
            &OllamaFactory,
            &credentials,
        )?),
    };
    debug!(
        provider = resolved.provider.as_str(),
        base_url = %resolved.base_url,
        persona = model.model_id(),
        "session ready"
    );

    Ok(Session { model })
}
