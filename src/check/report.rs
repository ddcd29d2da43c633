// src/check/report.rs

//! Run report written after every check
//!
//! The report is what monitoring and the install session read to learn what
//! the last check decided and what went wrong along the way.

use crate::catalog::RestartAction;
use crate::error::{Error, Result};
use crate::resolver::OutcomeRecord;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Summary of one check run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CheckReport {
    /// Primary manifest the run resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_name: Option<String>,
    pub start_time: String,
    pub end_time: String,

    /// Every install decision, before filtering to actionable items
    pub managed_installs: Vec<OutcomeRecord>,
    pub installed_items: Vec<String>,
    /// Items that need installing but have no downloaded installer
    pub problem_installs: Vec<OutcomeRecord>,
    pub removed_items: Vec<String>,

    pub items_to_install: Vec<OutcomeRecord>,
    pub items_to_remove: Vec<OutcomeRecord>,

    #[serde(rename = "managed_installs_list")]
    pub managed_installs_list: Vec<String>,
    #[serde(rename = "managed_uninstalls_list")]
    pub managed_uninstalls_list: Vec<String>,
    #[serde(rename = "managed_updates_list")]
    pub managed_updates_list: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_install_urgency: Option<String>,
    pub restart_required: bool,
    pub logout_required: bool,

    pub warnings: Vec<String>,
}

impl CheckReport {
    /// Whether the plan has anything to install or remove
    pub fn has_pending_actions(&self) -> bool {
        !self.items_to_install.is_empty() || !self.items_to_remove.is_empty()
    }

    /// Set the restart and logout flags from the actionable records
    pub fn note_restart_actions(&mut self) {
        for record in self.items_to_install.iter().chain(&self.items_to_remove) {
            match record.restart_action {
                Some(RestartAction::RequireRestart) | Some(RestartAction::RecommendRestart) => {
                    self.restart_required = true
                }
                Some(RestartAction::RequireLogout) => self.logout_required = true,
                Some(RestartAction::None) | None => {}
            }
        }
    }

    /// Write the report as an XML plist
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        plist::to_file_xml(path, self).map_err(|e| Error::MalformedDocument {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        plist::from_file(path).map_err(|e| Error::MalformedDocument {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, restart: Option<RestartAction>) -> OutcomeRecord {
        OutcomeRecord {
            name: name.to_string(),
            restart_action: restart,
            installer_item: Some(format!("{}.pkg", name)),
            ..Default::default()
        }
    }

    #[test]
    fn test_restart_flags() {
        let mut report = CheckReport {
            items_to_install: vec![record("Office", Some(RestartAction::RecommendRestart))],
            items_to_remove: vec![record("VPN", Some(RestartAction::RequireLogout))],
            ..Default::default()
        };
        report.note_restart_actions();
        assert!(report.restart_required);
        assert!(report.logout_required);
        assert!(report.has_pending_actions());
    }

    #[test]
    fn test_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ManagedInstallReport.plist");
        let report = CheckReport {
            manifest_name: Some("site_default".to_string()),
            installed_items: vec!["Bar".to_string()],
            force_install_urgency: Some("soon".to_string()),
            warnings: vec!["Could not retrieve catalog testing".to_string()],
            ..Default::default()
        };
        report.save(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("<key>ManifestName</key>"));
        assert!(content.contains("<key>managed_installs_list</key>"));
        assert_eq!(CheckReport::load(&path).unwrap(), report);
    }
}
