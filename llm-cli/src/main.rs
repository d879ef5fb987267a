mod repl;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use llm_client::{
    ClientOptions, ConfigResolver, GenerationParams, LlmSystem, Message, Request, Response,
};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "llmc",
    about = "Talk to LLM providers through one interface",
    long_about = "Lists providers and models, runs one-off generations and interactive chats against any configured LLM backend"
)]
#[command(version)]
struct Args {
    /// Directory with models_config.json/.toml and application.properties
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Enable debug mode for verbose output
    #[arg(short, long, global = true, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Registered providers and whether their credentials are present
    Providers {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Models offered by one or all providers
    Models {
        /// Only this provider
        #[arg(short, long)]
        provider: Option<String>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Send a single prompt
    Generate {
        prompt: String,
        #[command(flatten)]
        target: Target,
        /// Sampling temperature
        #[arg(short, long)]
        temperature: Option<f32>,
        /// Maximum tokens to generate
        #[arg(long)]
        max_tokens: Option<u32>,
        /// System prompt
        #[arg(short, long)]
        system: Option<String>,
        /// Print fragments as they arrive
        #[arg(long, conflicts_with = "json")]
        stream: bool,
        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Interactive chat over stdin
    Chat {
        #[command(flatten)]
        target: Target,
        /// Send the last N exchanges as context with every prompt
        #[arg(long)]
        shots: Option<usize>,
        /// System prompt
        #[arg(short, long)]
        system: Option<String>,
    },
}

/// Provider/model selection; both fall back to the configured defaults
#[derive(clap::Args, Debug)]
struct Target {
    /// Provider name (anthropic, openai, google, bedrock, mock, ...)
    #[arg(short, long)]
    provider: Option<String>,
    /// Model name
    #[arg(short, long)]
    model: Option<String>,
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

fn load_system(config_dir: Option<PathBuf>) -> Result<LlmSystem> {
    let dir = match config_dir {
        Some(dir) => dir,
        None => ConfigResolver::default_config_dir().context("Failed to locate config directory")?,
    };
    LlmSystem::initialize(&dir)
        .with_context(|| format!("Failed to load configuration from {}", dir.display()))
}

fn list_providers(system: &LlmSystem, json: bool) -> Result<()> {
    let providers = system.list_providers();
    if json {
        println!("{}", serde_json::to_string_pretty(&providers)?);
        return Ok(());
    }

    let defaults = system.resolver().settings();
    println!("Providers:");
    for info in &providers {
        let status = match (info.enabled, info.credentials_valid) {
            (false, _) => "disabled",
            (true, true) => "ready",
            (true, false) => "missing credentials",
        };
        let default_marker = if info.name == defaults.default_provider {
            " (default)"
        } else {
            ""
        };
        let env = info
            .credential_env
            .as_deref()
            .map(|var| format!(" [{}]", var))
            .unwrap_or_default();
        println!(
            "  {:<12} {:<20} {} models{}{}",
            info.name,
            status,
            info.models.len(),
            env,
            default_marker
        );
    }
    Ok(())
}

fn list_models(system: &LlmSystem, provider: Option<&str>, json: bool) -> Result<()> {
    let models = system
        .list_models(provider)
        .context("Failed to list models")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&models)?);
        return Ok(());
    }

    for model in &models {
        let context = model
            .context_window
            .map(|c| format!("{} ctx", c))
            .unwrap_or_else(|| "-".into());
        let pricing = match (
            model.cost_per_million_input_tokens,
            model.cost_per_million_output_tokens,
        ) {
            (Some(input), Some(output)) => format!("${:.2}/${:.2} per 1M", input, output),
            _ => "-".into(),
        };
        println!(
            "  {:<12} {:<48} {:>12}  {}",
            model.provider, model.name, context, pricing
        );
    }
    Ok(())
}

fn print_usage(response: &Response) {
    if let Some(usage) = response.usage() {
        eprintln!(
            "Tokens: {} in, {} out",
            usage.input_tokens, usage.output_tokens
        );
    }
}

#[allow(clippy::too_many_arguments)]
async fn generate(
    system: &LlmSystem,
    prompt: String,
    target: &Target,
    params: GenerationParams,
    system_prompt: Option<String>,
    stream: bool,
    json: bool,
    debug: bool,
) -> Result<()> {
    let client = system
        .create_client(
            target.provider.as_deref(),
            target.model.as_deref(),
            &ClientOptions::new(),
        )
        .context("Failed to create client")?;

    log::info!(
        "Using LLM provider: {} (model: {})",
        client.provider_name(),
        client.model_name()
    );

    let mut messages: Vec<Message> = system_prompt.into_iter().map(Message::system).collect();
    messages.push(Message::user(prompt));
    let request = Request::messages(messages).with_params(params);

    if stream {
        let mut fragments = client.send_stream(request).await;
        let mut stdout = std::io::stdout();
        while let Some(fragment) = fragments.next().await {
            let fragment = fragment.map_err(|e| anyhow::anyhow!("{}", e))?;
            write!(stdout, "{}", fragment)?;
            stdout.flush()?;
        }
        println!();
        return Ok(());
    }

    let response = client.send(request).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }
    if let Some(error) = response.error() {
        anyhow::bail!("{} request failed: {}", response.provider(), error);
    }
    println!("{}", response.content());
    if debug {
        print_usage(&response);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let system = load_system(args.config_dir)?;

    match args.command {
        Commands::Providers { json } => list_providers(&system, json),
        Commands::Models { provider, json } => list_models(&system, provider.as_deref(), json),
        Commands::Generate {
            prompt,
            target,
            temperature,
            max_tokens,
            system: system_prompt,
            stream,
            json,
        } => {
            let params = GenerationParams {
                temperature,
                max_tokens,
                ..Default::default()
            };
            generate(
                &system,
                prompt,
                &target,
                params,
                system_prompt,
                stream,
                json,
                args.debug,
            )
            .await
        }
        Commands::Chat {
            target,
            shots,
            system: system_prompt,
        } => {
            let client = system
                .create_client(
                    target.provider.as_deref(),
                    target.model.as_deref(),
                    &ClientOptions::new(),
                )
                .context("Failed to create client")?;
            log::info!(
                "Chatting with {} (model: {})",
                client.provider_name(),
                client.model_name()
            );
            repl::run(&client, shots, system_prompt.as_deref(), args.debug).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_generate() {
        let args = Args::try_parse_from([
            "llmc", "-d", "generate", "hello", "-p", "mock", "-t", "0.2", "--stream",
        ])
        .unwrap();
        assert!(args.debug);
        match args.command {
            Commands::Generate {
                prompt,
                target,
                temperature,
                stream,
                ..
            } => {
                assert_eq!(prompt, "hello");
                assert_eq!(target.provider.as_deref(), Some("mock"));
                assert_eq!(temperature, Some(0.2));
                assert!(stream);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_stream_conflicts_with_json() {
        assert!(Args::try_parse_from(["llmc", "generate", "hi", "--stream", "--json"]).is_err());
    }
}
