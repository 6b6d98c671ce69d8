#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Command-line adapter for inspecting configurations and replaying raids
//! against synthetic instances.

mod simulate;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use exfil_core::{EnvironmentKind, OrchestratorConfig, TemplateCatalog, TemplateId};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(author, version, about = "Raid session orchestrator tools", long_about = None)]
struct Cli {
    /// Orchestrator configuration; built-in defaults when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Prints machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Parses the configuration and validates every template.
    CheckConfig,
    /// Lists the templates on offer.
    Templates,
    /// Runs a scripted raid on synthetic terrain.
    Simulate {
        /// Template to queue for; the first offered when omitted.
        #[arg(long)]
        template: Option<String>,
        /// Participants joining; the template minimum when omitted.
        #[arg(long)]
        players: Option<u64>,
        /// Upper bound on simulated seconds.
        #[arg(long, default_value_t = 1_800)]
        seconds: u64,
        /// Participants stay at their spawn instead of walking to the extraction point.
        #[arg(long)]
        idle: bool,
    },
}

/// Entry point for the raid orchestrator command-line interface.
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .compact()
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let catalog = config
        .catalog()
        .context("failed to build the template catalog")?;

    match cli.command {
        Action::CheckConfig => {
            println!(
                "configuration ok: {} templates, at most {} concurrent sessions",
                catalog.len(),
                config.queue.max_concurrent_sessions
            );
            Ok(())
        }
        Action::Templates => print_templates(&catalog, cli.json),
        Action::Simulate {
            template,
            players,
            seconds,
            idle,
        } => {
            let script = simulate::Script {
                template: template.map(TemplateId::new),
                players,
                seconds,
                walk_to_extraction: !idle,
            };
            let report = simulate::run(config, catalog, &script)?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("failed to encode report")?
                );
            } else {
                report.print();
            }
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<OrchestratorConfig> {
    match path {
        Some(path) => OrchestratorConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => Ok(OrchestratorConfig::default()),
    }
}

#[derive(Serialize)]
struct TemplateRow<'a> {
    id: &'a TemplateId,
    display_name: &'a str,
    environment: EnvironmentKind,
    size_chunks: u32,
    duration_seconds: u64,
    min_players: u32,
    max_players: u32,
    min_teams: u32,
    max_teams: u32,
}

fn print_templates(catalog: &TemplateCatalog, json: bool) -> Result<()> {
    let rows: Vec<TemplateRow<'_>> = catalog
        .templates()
        .iter()
        .map(|template| {
            let bounds = template.bounds();
            TemplateRow {
                id: template.id(),
                display_name: template.display_name(),
                environment: template.environment(),
                size_chunks: template.size_chunks(),
                duration_seconds: template.duration_seconds(),
                min_players: bounds.min_players(),
                max_players: bounds.max_players(),
                min_teams: bounds.min_teams(),
                max_teams: bounds.max_teams(),
            }
        })
        .collect();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&rows).context("failed to encode templates")?
        );
        return Ok(());
    }
    for row in rows {
        println!(
            "{:<16} {:<24} {:<8} {:>3} chunks {:>6}s players {}-{} teams {}-{}",
            row.id,
            row.display_name,
            format!("{:?}", row.environment),
            row.size_chunks,
            row.duration_seconds,
            row.min_players,
            row.max_players,
            row.min_teams,
            row.max_teams
        );
    }
    Ok(())
}
