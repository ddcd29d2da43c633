// src/commands/force.rs

//! `cairn force-status`: force-install deadlines on the current plan

use anyhow::Result;
use cairn::Config;
use cairn::resolver::InstallInfo;
use cairn::scheduler::{ForceInstallScheduler, describe_deadline, earliest_deadline};
use chrono::Local;
use std::path::Path;

/// Evaluate deadlines now, writing back any switch to unattended install
pub fn cmd_force_status(config_path: Option<&Path>, format: &str) -> Result<()> {
    let config = Config::load(config_path)?;
    let path = config.install_info_path();
    let mut info = InstallInfo::load(&path).unwrap_or_default();

    let now = Local::now().naive_local();
    let scheduler = ForceInstallScheduler::new(config.force_install_warning_hours);
    let (urgency, mutated) = scheduler.evaluate(&mut info.managed_installs, now);
    if mutated {
        info.save_if_changed(&path)?;
    }

    let forced: Vec<_> = info
        .managed_installs
        .iter()
        .filter_map(|r| r.force_install_after_date.map(|d| (r, d)))
        .collect();

    match format {
        "json" => {
            let items: Vec<_> = forced
                .iter()
                .map(|(record, deadline)| {
                    serde_json::json!({
                        "name": record.name,
                        "deadline": deadline.format("%Y-%m-%d %H:%M:%S").to_string(),
                        "due": describe_deadline(*deadline, now),
                        "unattended_install": record.unattended_install,
                    })
                })
                .collect();
            let json = serde_json::json!({
                "urgency": urgency.map(|u| u.to_string()),
                "mutated": mutated,
                "items": items,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        _ => {
            if forced.is_empty() {
                println!("No pending installs have a force-install deadline.");
                return Ok(());
            }
            match urgency {
                Some(urgency) => println!("Urgency: {}", urgency),
                None => println!("Urgency: none"),
            }
            if let Some(deadline) = earliest_deadline(&info.managed_installs) {
                println!("Next deadline: {} ({})", deadline, describe_deadline(deadline, now));
            }
            println!();
            for (record, deadline) in &forced {
                let mode = if record.unattended_install { " [unattended]" } else { "" };
                println!(
                    "  {} at {} ({}){}",
                    record.name,
                    deadline,
                    describe_deadline(*deadline, now),
                    mode
                );
            }
        }
    }
    Ok(())
}
