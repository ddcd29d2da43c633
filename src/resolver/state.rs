// src/resolver/state.rs

//! Per-run resolution state and its persisted form
//!
//! [`ResolutionState`] is created at the start of a check and threaded
//! through every resolver call. Its output lists hold [`OutcomeRecord`]s,
//! which are append-only for the duration of the run. [`InstallInfo`] is the
//! subset written to disk for the installer to act on.

use crate::catalog::item::wall_clock_date;
use crate::catalog::{CopiedItem, InstallsItem, ItemRecord, Receipt, RestartAction, UninstallMethod};
use crate::error::{Error, Result};
use crate::version::{VersionComparison, base_name, compare_versions};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::warn;

fn is_false(b: &bool) -> bool {
    !*b
}

/// Decision recorded for one item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutcomeRecord {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Whether the item is (already) on disk
    pub installed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_to_install: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub needs_update: Option<bool>,

    /// Cache basename of the downloaded installer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installer_item: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installer_item_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installer_type: Option<String>,

    #[serde(rename = "RestartAction", skip_serializing_if = "Option::is_none")]
    pub restart_action: Option<RestartAction>,
    #[serde(with = "wall_clock_date", skip_serializing_if = "Option::is_none")]
    pub force_install_after_date: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "is_false")]
    pub unattended_install: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub unattended_uninstall: bool,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub update_for: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub installs: Vec<InstallsItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub receipts: Vec<Receipt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_os_version: Option<String>,

    // Removal fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uninstall_method: Option<UninstallMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uninstallable: Option<bool>,
    /// Package IDs whose last reference goes away with this removal
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uninstaller_item: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items_to_remove: Vec<CopiedItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove_app_info: Option<InstallsItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uninstall_script: Option<String>,

    // Self-service markers on optional installs
    #[serde(skip_serializing_if = "is_false")]
    pub will_be_installed: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub will_be_removed: bool,

    /// Why the item could not be acted on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl OutcomeRecord {
    /// Record for `item` with its descriptive keys copied over
    pub fn for_item(item: &ItemRecord) -> Self {
        Self {
            name: item.name.clone(),
            display_name: item.display_name.clone(),
            description: item.description.clone(),
            ..Default::default()
        }
    }

    /// Whether the installer requires a logout or restart
    pub fn has_restart_action(&self) -> bool {
        self.restart_action
            .is_some_and(|action| action != RestartAction::None)
    }
}

/// Mutable record threaded through a single check run
#[derive(Debug, Default)]
pub struct ResolutionState {
    pub processed_installs: HashSet<String>,
    pub processed_uninstalls: HashSet<String>,
    pub managed_updates: HashSet<String>,
    pub optional_installs_seen: HashSet<String>,
    pub managed_installs: Vec<OutcomeRecord>,
    pub removals: Vec<OutcomeRecord>,
    pub optional_installs: Vec<OutcomeRecord>,
    /// Warnings in the order they were raised
    pub warnings: Vec<String>,
}

impl ResolutionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log a warning and keep it for the run report
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.warnings.push(message);
    }

    /// Whether `name` is already scheduled at `version` or newer
    ///
    /// A record that is already installed always satisfies the request.
    pub fn is_scheduled_for_install(&self, name: &str, version: &str) -> bool {
        self.managed_installs
            .iter()
            .filter(|record| record.name == name)
            .any(|record| {
                if version.is_empty() || record.installed {
                    return true;
                }
                record
                    .version_to_install
                    .as_deref()
                    .is_some_and(|v| compare_versions(v, version) != VersionComparison::Older)
            })
    }

    /// Whether some version of `name` was decided for install
    pub fn install_processed_for_base(&self, name: &str) -> bool {
        let base = base_name(name);
        self.processed_installs.iter().any(|p| base_name(p) == base)
    }

    /// Whether the base of `name` was decided for removal
    pub fn removal_processed_for_base(&self, name: &str) -> bool {
        self.processed_uninstalls.contains(&base_name(name))
    }
}

/// The persisted action plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallInfo {
    pub managed_installs: Vec<OutcomeRecord>,
    pub removals: Vec<OutcomeRecord>,
    pub optional_installs: Vec<OutcomeRecord>,
    pub managed_updates: Vec<String>,
}

impl InstallInfo {
    /// Read a previous plan; an unreadable document is deleted and `None` returned
    pub fn load(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        match plist::from_file::<_, Self>(path) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!("Could not read {}: {}; removing it", path.display(), e);
                if let Err(e) = std::fs::remove_file(path) {
                    warn!("Could not remove {}: {}", path.display(), e);
                }
                None
            }
        }
    }

    /// Write the plan unless it matches what is already on disk
    ///
    /// Returns whether the file was written.
    pub fn save_if_changed(&self, path: &Path) -> Result<bool> {
        if Self::load(path).as_ref() == Some(self) {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        plist::to_file_xml(path, self).map_err(|e| Error::MalformedDocument {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(true)
    }
}
