mod dispatch;
mod repl_helpers;
mod runtime_context;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use veil_config::ProviderSetting;
use veil_llm::{ChatMessage, GenerateOptions, LanguageModel};

const REPL_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProviderArg {
    Openai,
    Ollama,
}

impl ProviderArg {
    fn as_setting(self) -> ProviderSetting {
        match self {
            ProviderArg::Openai => ProviderSetting::Openai,
            ProviderArg::Ollama => ProviderSetting::Ollama,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "veil", version, about = "Persona proxy for chat completion models")]
struct Cli {
    /// Path to a veil.json config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log debug events to stderr.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Args)]
struct ModelArgs {
    /// Persona model key, e.g. `fast`.
    #[arg(long)]
    model: Option<String>,
    #[arg(long, value_enum)]
    provider: Option<ProviderArg>,
    /// Print the reply as it streams in.
    #[arg(long)]
    stream: bool,
    /// Caller system prompt, kept after the persona block.
    #[arg(long)]
    system: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Send one prompt through the persona proxy.
    Chat {
        prompt: String,
        #[command(flatten)]
        model: ModelArgs,
    },
    /// Multi-turn chat session.
    Repl {
        #[command(flatten)]
        model: ModelArgs,
    },
    /// Show which interception rule a message triggers.
    Classify { text: String },
    /// Sanitize model output from the argument or stdin.
    Sanitize {
        #[arg(long)]
        model: Option<String>,
        text: Option<String>,
    },
    /// List persona model keys.
    Models,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("VEIL_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    // A subscriber may already be installed when embedded in tests.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn chat_command(config: Option<PathBuf>, prompt: String, args: ModelArgs) -> Result<()> {
    let session = runtime_context::open_session(config, &args)?;
    let messages = repl_helpers::build_messages(args.system.as_deref(), &VecDeque::new(), &prompt);
    let reply = send(session.model.as_ref(), messages, args.stream)?;
    if !args.stream {
        println!("{reply}");
    }
    Ok(())
}

fn repl_command(config: Option<PathBuf>, args: ModelArgs) -> Result<()> {
    let session = runtime_context::open_session(config, &args)?;
    let mut history: VecDeque<ChatMessage> = VecDeque::new();
    let mut line = String::new();

    println!(
        "Veil REPL ({}). Type .help for commands, .exit to quit.",
        session.model.model_id()
    );
    loop {
        line.clear();
        print!("veil> ");
        io::stdout().flush().context("failed flushing stdout")?;

        let bytes = io::stdin()
            .read_line(&mut line)
            .context("failed reading REPL input")?;
        if bytes == 0 {
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match trimmed {
            ".exit" => break,
            ".help" => {
                println!("REPL commands:");
                println!("  .help  - show this help");
                println!("  .reset - forget the conversation");
                println!("  .exit  - quit");
                continue;
            }
            ".reset" => {
                history.clear();
                continue;
            }
            _ => {}
        }

        let messages = repl_helpers::build_messages(args.system.as_deref(), &history, trimmed);
        match send(session.model.as_ref(), messages, args.stream) {
            Ok(reply) => {
                if !args.stream {
                    println!("{reply}");
                }
                repl_helpers::push_bounded(&mut history, ChatMessage::user(trimmed), REPL_HISTORY_LIMIT);
                repl_helpers::push_bounded(&mut history, ChatMessage::assistant(reply), REPL_HISTORY_LIMIT);
            }
            Err(err) => eprintln!("error: {err:#}"),
        }
    }
    Ok(())
}

/// Returns the full reply; in stream mode it is also printed as it arrives.
fn send(model: &dyn LanguageModel, messages: Vec<ChatMessage>, stream: bool) -> Result<String> {
    let options = GenerateOptions::from_messages(messages);
    if !stream {
        return Ok(model.generate(&options)?.content);
    }

    let mut reply = String::new();
    let mut stdout = io::stdout();
    for chunk in model.stream(&options)? {
        let chunk = chunk?;
        stdout
            .write_all(chunk.delta.as_bytes())
            .context("failed writing to stdout")?;
        stdout.flush().context("failed flushing stdout")?;
        reply.push_str(&chunk.delta);
    }
    println!();
    Ok(reply)
}

fn classify_command(config: Option<PathBuf>, text: String) -> Result<()> {
    let resolved = runtime_context::resolve_config(config, &Default::default())?;
    let proxy = runtime_context::build_proxy(&resolved)?;
    match proxy.engine().classify(&text) {
        Some(rule) => println!(
            "tier={} rule={} priority={}",
            rule.tier.as_str(),
            rule.name,
            rule.priority
        ),
        None => println!("no match"),
    }
    Ok(())
}

fn sanitize_command(
    config: Option<PathBuf>,
    model: Option<String>,
    text: Option<String>,
) -> Result<()> {
    let resolved = runtime_context::resolve_config(
        config,
        &veil_config::CliOverrides {
            model,
            ..Default::default()
        },
    )?;
    let proxy = runtime_context::build_proxy(&resolved)?;
    let persona = proxy.persona(&resolved.model)?;

    let text = match text {
        Some(text) => text,
        None => {
            let mut input = String::new();
            io::stdin()
                .read_to_string(&mut input)
                .context("failed reading stdin")?;
            input
        }
    };
    if text.trim().is_empty() {
        return Err(anyhow!("nothing to sanitize: pass text or pipe it on stdin"));
    }

    let out = proxy.engine().sanitize_response(&text, persona);
    print!("{out}");
    if !out.ends_with('\n') {
        println!();
    }
    Ok(())
}

fn models_command(config: Option<PathBuf>) -> Result<()> {
    let resolved = runtime_context::resolve_config(config, &Default::default())?;
    let proxy = runtime_context::build_proxy(&resolved)?;
    let catalog = proxy.catalog();
    for persona in catalog.personas() {
        println!(
            "{} -> {} ({})",
            persona.model_key,
            persona.display_name,
            catalog.upstream_model(&persona.model_key)?
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    dispatch::execute(cli)
}
