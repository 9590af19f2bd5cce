mod chat;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use console::style;

use crate::config::Config;
use crate::core::db::{ConnectionFactory, SqliteFactory};
use crate::core::executor::ExecutionAdapter;
use crate::core::llm::LlmClient;
use crate::core::llm::providers::OpenAiProvider;
use crate::core::recovery::RecoveryEngine;
use crate::core::schema::{SchemaCache, SqliteCatalog};
use crate::core::session::Orchestrator;
use crate::core::terminal;
use crate::logging;

fn print_help() {
    terminal::print_banner();

    println!(" {}", style("Commands").bold().underlined());
    for (cmd, desc) in [
        ("chat", "Interactive question-and-answer session (default)"),
        ("ask <question>", "Answer a single question and exit"),
        ("schema", "Print the cached schema summary"),
        ("stats", "Print table statistics"),
        ("help", "Show this screen"),
    ] {
        println!("   {:<16} {}", style(cmd).green(), desc);
    }

    println!("\n {}", style("Flags").bold().underlined());
    for (flag, desc) in [
        ("--config <path>", "Configuration file (default: tabletalk.toml)"),
        ("--env <name>", "Named environment from the configuration"),
        ("--verbose", "Enable debug logging"),
    ] {
        println!("   {:<16} {}", style(flag).green(), desc);
    }

    println!(
        "\n {} {} [command] [flags]\n",
        style("Usage:").bold(),
        style("tabletalk").green()
    );
}

#[derive(Debug, Default)]
struct CliArgs {
    command: Option<String>,
    question: Vec<String>,
    config: Option<PathBuf>,
    env: Option<String>,
    verbose: bool,
}

fn parse_args(args: &[String]) -> CliArgs {
    let mut parsed = CliArgs::default();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--env" | "-e" => {
                if i + 1 < args.len() {
                    parsed.env = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                parsed.verbose = true;
                i += 1;
            }
            word => {
                if parsed.command.is_none() {
                    parsed.command = Some(word.to_string());
                } else {
                    parsed.question.push(word.to_string());
                }
                i += 1;
            }
        }
    }
    parsed
}

fn data_stack(config: &Config, env: Option<&str>) -> Result<(Arc<dyn ConnectionFactory>, Arc<SchemaCache>)> {
    let environment = config.environment(env)?;
    let factory: Arc<dyn ConnectionFactory> = Arc::new(SqliteFactory::new(&environment.database));
    let catalog = Arc::new(SqliteCatalog::new(factory.clone()));
    let cache = Arc::new(SchemaCache::new(catalog, config.recovery.max_column_values));
    Ok((factory, cache))
}

fn build_orchestrator(
    config: &Config,
    factory: Arc<dyn ConnectionFactory>,
    cache: Arc<SchemaCache>,
) -> Result<Orchestrator> {
    let provider = Arc::new(OpenAiProvider::new(
        config.api_key()?,
        config.llm.base_url.clone(),
    ));
    let llm = Arc::new(LlmClient::new(
        provider,
        config.llm.model.clone(),
        Duration::from_secs(config.llm.timeout_secs),
    ));
    let adapter = Arc::new(ExecutionAdapter::new(factory, cache.clone()));
    let recovery = RecoveryEngine::new(cache.clone(), config.recovery.threshold);
    Ok(Orchestrator::new(
        llm,
        adapter,
        recovery,
        cache,
        config.recovery.max_attempts,
    ))
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let parsed = parse_args(&args);
    logging::init(parsed.verbose);

    match parsed.command.as_deref() {
        None | Some("chat") => {
            let config = Config::load(parsed.config.as_deref())?;
            let (factory, cache) = data_stack(&config, parsed.env.as_deref())?;
            let orchestrator = build_orchestrator(&config, factory, cache)?;
            chat::run_chat(&orchestrator).await
        }
        Some("ask") => {
            let question = parsed.question.join(" ");
            if question.trim().is_empty() {
                terminal::print_error("ask requires a question, e.g. tabletalk ask \"top films\"");
                return Ok(());
            }
            let config = Config::load(parsed.config.as_deref())?;
            let (factory, cache) = data_stack(&config, parsed.env.as_deref())?;
            let orchestrator = build_orchestrator(&config, factory, cache)?;
            chat::run_single(&orchestrator, &question).await
        }
        Some("schema") => {
            let config = Config::load(parsed.config.as_deref())?;
            let (_factory, cache) = data_stack(&config, parsed.env.as_deref())?;
            println!("{}", cache.schema_summary().await?);
            Ok(())
        }
        Some("stats") => {
            let config = Config::load(parsed.config.as_deref())?;
            let (_factory, cache) = data_stack(&config, parsed.env.as_deref())?;
            println!("{}", cache.statistics().await?);
            Ok(())
        }
        _ => {
            print_help();
            Ok(())
        }
    }
}
