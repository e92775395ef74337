//! cb - ctxbridge command-line entry point
//!
//! Spins up an in-process host with the built-in handlers and drives it
//! through a client.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use futures::future::join_all;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use ctxbridge::cli::{Cli, Command};
use ctxbridge::config::Config;
use ctxbridge::sink::{LogSink, MemorySink, TracingSink};
use ctxbridge::{Bridge, Envelope, LogLevel, Mode, Outcome, handlers};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .map_err(|e| eyre::eyre!("Failed to install tracing subscriber: {}", e))?;

    debug!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate()?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Info { mode, filter } => cmd_info(&config, mode, &filter).await,
        Command::Call {
            instruction,
            data,
            mode,
            timeout_ms,
        } => cmd_call(&config, &instruction, &data, mode, timeout_ms).await,
        Command::Demo { concurrency } => cmd_demo(&config, concurrency).await,
    }
}

fn tracing_sink(config: &Config) -> Arc<dyn LogSink> {
    Arc::new(TracingSink::new(config.sink.threshold))
}

/// List instructions and their required parameters
async fn cmd_info(config: &Config, mode: Mode, filter: &[String]) -> Result<()> {
    debug!(%mode, ?filter, "cmd_info: called");
    let bridge = Bridge::start(config, tracing_sink(config), handlers::install)?;

    let names: Vec<&str> = filter.iter().map(String::as_str).collect();
    let report = bridge.client().info(mode, &names).await;
    bridge.shutdown().await;
    let report = report?;

    println!("{} ({})", "Instructions".bold(), mode);
    if report.is_empty() {
        println!("  {}", "none".dimmed());
    }
    for (name, params) in &report {
        if params.is_empty() {
            println!("  {}", name.green());
        } else {
            println!("  {} {}", name.green(), params.join(", ").yellow());
        }
    }
    Ok(())
}

/// Issue one instruction and print its outcome
async fn cmd_call(config: &Config, instruction: &str, data: &str, mode: Mode, timeout_ms: Option<u64>) -> Result<()> {
    debug!(%instruction, %mode, ?timeout_ms, "cmd_call: called");
    let data: Map<String, Value> = serde_json::from_str(data).context("--data must be a JSON object")?;

    let sink = Arc::new(MemorySink::new());
    let bridge = Bridge::start(config, sink.clone(), handlers::install)?;
    let timeout = timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| bridge.client().default_timeout());

    let envelope = Envelope::new(instruction).with_data(data);
    let outcome = bridge.client().call_with_timeout(envelope, mode, timeout).await;
    bridge.shutdown().await;
    let outcome = outcome?;

    print_outcome(&outcome)?;
    for recorded in sink.entries() {
        let level = match recorded.entry.level {
            LogLevel::Debug => "debug".dimmed(),
            LogLevel::Info => "info".blue(),
            LogLevel::Warning => "warning".yellow(),
            LogLevel::Error => "error".red(),
        };
        println!("  [{}] {}", level, recorded.entry.text);
    }

    if !outcome.result {
        return Err(eyre::eyre!("instruction '{}' failed", instruction));
    }
    Ok(())
}

fn print_outcome(outcome: &Outcome) -> Result<()> {
    let status = if outcome.result { "ok".green().bold() } else { "failed".red().bold() };
    println!(
        "{} {} id={} mode={}",
        status,
        outcome.instruction().unwrap_or("-"),
        outcome.id().unwrap_or("-"),
        outcome.mode()
    );
    println!("{}", serde_json::to_string_pretty(outcome.data())?);
    if !outcome.missing_params.is_empty() {
        let missing: Vec<&str> = outcome.missing_params.iter().map(String::as_str).collect();
        println!("{} {}", "missing:".yellow(), missing.join(", "));
    }
    Ok(())
}

/// Fire `concurrency` calls at once, mixing modes and instructions
async fn cmd_demo(config: &Config, concurrency: usize) -> Result<()> {
    debug!(concurrency, "cmd_demo: called");
    let bridge = Bridge::start(config, tracing_sink(config), handlers::install)?;
    let client = bridge.client().clone();

    let calls = (0..concurrency).map(|i| {
        let client = client.clone();
        let mode = if i % 2 == 0 { Mode::Sync } else { Mode::Async };
        let envelope = match i % 4 {
            0 => Envelope::new("echo").with_param("text", format!("hello #{}", i)),
            1 => Envelope::new("sleep").with_param("ms", json!(((concurrency - i) * 10) as u64)),
            2 => Envelope::new("ping"),
            _ => Envelope::new("echo"),
        };
        async move { client.call_with_timeout(envelope, mode, client.default_timeout()).await }
    });

    let results = join_all(calls).await;
    let stats = bridge.stats();
    bridge.shutdown().await;

    let mut succeeded = 0;
    for result in &results {
        match result {
            Ok(outcome) => {
                if outcome.result {
                    succeeded += 1;
                }
                let status = if outcome.result { "ok".green() } else { "failed".red() };
                println!(
                    "  {:<6} {:<5} {:<6} {}",
                    status,
                    outcome.mode(),
                    outcome.instruction().unwrap_or("-"),
                    outcome.id().unwrap_or("-").dimmed()
                );
            }
            Err(e) => println!("  {:<6} {}", "error".red(), e),
        }
    }

    println!(
        "{} {}/{} succeeded, dispatcher received {} (routed {}, unknown {}, malformed {})",
        "Demo:".bold(),
        succeeded,
        results.len(),
        stats.received,
        stats.routed,
        stats.unknown,
        stats.malformed
    );
    info!(succeeded, total = results.len(), "Demo finished");
    Ok(())
}
