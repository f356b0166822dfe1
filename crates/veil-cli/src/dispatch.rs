use super::{Cli, Commands, chat_command, classify_command, models_command};
use super::{repl_command, sanitize_command};
use anyhow::Result;

pub(crate) fn execute(cli: Cli) -> Result<()> {
    let config = cli.config;
    match cli.command {
        Commands::Chat { prompt, model } => chat_command(config, prompt, model),
        Commands::Repl { model } => repl_command(config, model),
        Commands::Classify { text } => classify_command(config, text),
        Commands::Sanitize { model, text } => sanitize_command(config, model, text),
        Commands::Models => models_command(config),
    }
}
