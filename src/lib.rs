//! TaskVault: durable, integrity-verified, initiative-scoped task storage.
//!
//! Domain objects (initiatives, tasks, dependency contracts) are stored as
//! pretty-printed JSON documents, each paired with an HMAC sidecar. Nothing
//! is parsed until its sidecar verifies. Every write is bracketed by an
//! append-only journal entry so an interrupted write can be found and settled
//! after a restart, and dependency sets are checked for cycles and
//! date-order violations before they are accepted.
//!
//! # Layout
//!
//! ```text
//! <root>/<initiativeId>/
//!   manifest.json, manifest.json.sig
//!   tasks/<taskId>.json, tasks/<taskId>.json.sig
//!   dependencies.json, dependencies.json.sig
//!   journal.jsonl
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: integrity, signed storage, journal, dependency graph and the
//!   shared model/config/error types
//! - [`plugins`]: the write pipeline ([`plugins::vault::TaskVault`]) and the
//!   task-management collaborator ([`plugins::tasks`])

pub mod core;
pub mod plugins;

mod cli;

use crate::core::config::{self, DEFAULT_CONFIG_FILE, VaultConfig};
use crate::core::error::VaultError;
use crate::core::filesystem::IntegrityReport;
use crate::core::logging;
use crate::core::time::command_envelope;
use crate::plugins::vault::TaskVault;
use clap::Parser;
use cli::{Cli, Command, OutputFormat};
use colored::Colorize;
use std::path::Path;

fn resolve_config(cli: &Cli) -> Result<VaultConfig, VaultError> {
    let mut config = match &cli.config {
        Some(path) if !path.exists() => {
            return Err(VaultError::ConfigError(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        Some(path) => config::load_config(path)?,
        None => config::load_config(Path::new(DEFAULT_CONFIG_FILE))?,
    };
    if let Some(root) = &cli.root {
        config.root_dir = root.clone();
    }
    config.validate()?;
    Ok(config)
}

fn print_json(value: &serde_json::Value) -> Result<(), VaultError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn run() -> Result<(), VaultError> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    logging::init(&config.log_filter);
    let vault = TaskVault::open(&config)?;
    let format = cli.format;

    match cli.command {
        Command::Initiatives => {
            let ids = vault.list_initiatives()?;
            match format {
                OutputFormat::Json => print_json(&command_envelope(
                    "initiatives",
                    "ok",
                    serde_json::json!({ "initiatives": ids }),
                ))?,
                OutputFormat::Text => {
                    for id in &ids {
                        let label = match vault.load_initiative(id).found() {
                            Some(initiative) => format!(
                                "{} [{}] {}",
                                initiative.name,
                                initiative.status.as_str(),
                                initiative.owner
                            ),
                            None => "(manifest unavailable)".bright_red().to_string(),
                        };
                        println!("{}  {}", id.bright_cyan(), label);
                    }
                    if ids.is_empty() {
                        println!("No initiatives under {}", vault.root().display());
                    }
                }
            }
        }
        Command::Tasks { initiative } => {
            let tasks = vault.load_tasks(&initiative)?;
            match format {
                OutputFormat::Json => print_json(&command_envelope(
                    "tasks",
                    "ok",
                    serde_json::json!({ "initiative": initiative, "tasks": tasks }),
                ))?,
                OutputFormat::Text => {
                    for task in &tasks {
                        println!(
                            "{:<32} {:<12} {:<9} {}",
                            task.id.bright_cyan(),
                            task.status.as_str(),
                            task.priority.as_str(),
                            task.title
                        );
                    }
                    println!("{} task(s)", tasks.len());
                }
            }
        }
        Command::Verify { initiative } => {
            let reports = match initiative {
                Some(id) => vec![vault.verify_initiative(&id)?],
                None => vault.verify_all()?,
            };
            render_verify(format, &reports)?;
            let failures: usize = reports.iter().map(|r| r.violations.len()).sum();
            if failures > 0 {
                return Err(VaultError::IntegrityViolation(format!(
                    "{} document(s) failed verification",
                    failures
                )));
            }
        }
        Command::Journal {
            initiative,
            pending,
        } => {
            let mut replay = vault.journal().replay(&initiative)?;
            if pending {
                replay.entries = replay.pending().cloned().collect();
            }
            match format {
                OutputFormat::Json => {
                    let malformed: Vec<_> = replay
                        .malformed
                        .iter()
                        .map(|m| {
                            serde_json::json!({
                                "line": m.line_number,
                                "content": m.content,
                                "error": m.error,
                            })
                        })
                        .collect();
                    print_json(&command_envelope(
                        "journal",
                        "ok",
                        serde_json::json!({
                            "initiative": initiative,
                            "entries": replay.entries,
                            "malformed": malformed,
                        }),
                    ))?
                }
                OutputFormat::Text => {
                    for entry in &replay.entries {
                        let status = match entry.status.as_str() {
                            "completed" => entry.status.as_str().bright_green(),
                            "failed" => entry.status.as_str().bright_red(),
                            other => other.bright_yellow(),
                        };
                        println!(
                            "{}  {}  {:<20} {}",
                            entry.timestamp.to_rfc3339(),
                            entry.id,
                            entry.operation,
                            status
                        );
                    }
                    for m in &replay.malformed {
                        println!(
                            "{} line {}: {}",
                            "malformed".bright_red(),
                            m.line_number,
                            m.error
                        );
                    }
                }
            }
        }
        Command::Recover => {
            let report = vault.recover()?;
            match format {
                OutputFormat::Json => print_json(&command_envelope(
                    "recover",
                    "ok",
                    serde_json::json!({
                        "resolved": report.resolved,
                        "unresolved": report.unresolved,
                        "malformed": report.malformed.len(),
                    }),
                ))?,
                OutputFormat::Text => {
                    println!(
                        "{} resolved, {} unresolved, {} malformed line(s)",
                        report.resolved.len().to_string().bright_green(),
                        report.unresolved.len().to_string().bright_yellow(),
                        report.malformed.len()
                    );
                    for entry in &report.unresolved {
                        println!(
                            "  {} {} {} {}",
                            "▸".bright_cyan(),
                            entry.initiative_id,
                            entry.id,
                            entry.operation
                        );
                    }
                }
            }
        }
        Command::Deps { initiative } => {
            let report = vault.check_dependencies(&initiative)?;
            match format {
                OutputFormat::Json => print_json(&command_envelope(
                    "deps",
                    if report.is_clean() { "ok" } else { "violations" },
                    serde_json::json!({ "initiative": initiative, "report": report }),
                ))?,
                OutputFormat::Text => {
                    if report.is_clean() {
                        println!("{} dependency graph is sound", "✓".bright_green());
                    }
                    for cycle in &report.cycles {
                        println!("{} cycle: {}", "✗".bright_red(), cycle.join(" -> "));
                    }
                    for v in &report.violations {
                        println!(
                            "{} {} ({}) is due before {} ({}) which it waits on",
                            "⚠".bright_yellow(),
                            v.dependent,
                            v.dependent_date.date_naive(),
                            v.dependency,
                            v.dependency_date.date_naive()
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

fn render_verify(format: OutputFormat, reports: &[IntegrityReport]) -> Result<(), VaultError> {
    match format {
        OutputFormat::Json => {
            let items: Vec<_> = reports
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "initiative": r.initiative_id,
                        "checked": r.checked,
                        "violations": r
                            .violations
                            .iter()
                            .map(|v| serde_json::json!({
                                "path": v.path,
                                "reason": v.failure.to_string(),
                            }))
                            .collect::<Vec<_>>(),
                    })
                })
                .collect();
            let clean = reports.iter().all(|r| r.is_clean());
            print_json(&command_envelope(
                "verify",
                if clean { "ok" } else { "violations" },
                serde_json::json!({ "reports": items }),
            ))
        }
        OutputFormat::Text => {
            for r in reports {
                if r.is_clean() {
                    println!(
                        "{} {} ({} documents)",
                        "✓".bright_green(),
                        r.initiative_id,
                        r.checked
                    );
                } else {
                    println!(
                        "{} {} ({} of {} documents failed)",
                        "✗".bright_red(),
                        r.initiative_id,
                        r.violations.len(),
                        r.checked
                    );
                    for v in &r.violations {
                        println!("    {}: {}", v.path, v.failure);
                    }
                }
            }
            Ok(())
        }
    }
}
