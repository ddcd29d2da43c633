// src/commands/check.rs

//! `cairn check`: run a managed software check

use anyhow::{Context, Result};
use cairn::catalog::RestartAction;
use cairn::check::{CheckOrchestrator, CheckOutcome, RunLock};
use cairn::detect::NoVendorUpdates;
use cairn::facts::MachineFacts;
use cairn::fetch::HttpFetcher;
use cairn::repo::RemoteRepo;
use cairn::resolver::{FsDiskSpace, OutcomeRecord};
use cairn::{CancellationToken, Config};
use std::path::Path;
use tracing::info;

fn restart_note(record: &OutcomeRecord) -> Option<&'static str> {
    match record.restart_action {
        Some(RestartAction::RequireRestart) | Some(RestartAction::RecommendRestart) => {
            Some("*Restart required")
        }
        Some(RestartAction::RequireLogout) => Some("*Logout required"),
        _ => None,
    }
}

fn print_plan(outcome: &CheckOutcome) {
    let info = &outcome.install_info;
    if !info.managed_installs.is_empty() {
        println!("The following items will be installed or upgraded:");
        for record in &info.managed_installs {
            println!(
                "    + {}-{}",
                record.name,
                record.version_to_install.as_deref().unwrap_or("")
            );
            if let Some(description) = &record.description {
                println!("        {}", description);
            }
            if let Some(note) = restart_note(record) {
                println!("       {}", note);
            }
        }
    }
    if !info.removals.is_empty() {
        println!("The following items will be removed:");
        for record in &info.removals {
            println!("    - {}", record.name);
            if let Some(note) = restart_note(record) {
                println!("       {}", note);
            }
        }
    }
    if !outcome.pending() {
        println!("No changes to managed software are available.");
    }

    let report = &outcome.report;
    if !report.problem_installs.is_empty() {
        println!();
        println!("Items that could not be prepared:");
        for record in &report.problem_installs {
            match &record.note {
                Some(note) => println!("    ! {}: {}", record.name, note),
                None => println!("    ! {}", record.name),
            }
        }
    }
    if let Some(urgency) = &report.force_install_urgency {
        println!();
        println!("Forced installs due: {}", urgency);
    }
}

/// Run a check, returning the process exit status
pub fn cmd_check(
    config_path: Option<&Path>,
    id: Option<&str>,
    json: bool,
    quiet: bool,
    cancel: CancellationToken,
) -> Result<i32> {
    let config = Config::load(config_path)?;
    let _lock = RunLock::try_acquire(config.lock_path())?;

    let fetcher = HttpFetcher::new()
        .context("Failed to set up the download client")?
        .with_progress(!quiet && !json);
    let repo = RemoteRepo::new(&config, &fetcher);
    let disk = FsDiskSpace::new(config.cache_dir());
    let machine = MachineFacts::discover(&config);
    info!(
        "Checking as {} ({} {}, {})",
        machine.hostname, machine.machine_model, machine.os_version, machine.arch
    );

    let outcome = CheckOrchestrator::new(&config, &repo, &fetcher, &disk, &NoVendorUpdates, machine)
        .with_cancellation(cancel)
        .run(id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.report)?);
    } else {
        print_plan(&outcome);
    }
    Ok(outcome.exit_code())
}
