// src/resolver/removal.rs

//! Removal-side resolution
//!
//! Removals aren't version-specific unless the request embeds a version:
//! every catalog version of the name is a candidate and the first one with
//! evidence on disk becomes the removal target. Items that require the
//! target are removed first, and updaters for it are removed along with it.

use super::Resolver;
use super::state::OutcomeRecord;
use crate::catalog::{ItemRecord, RestartAction, UninstallMethod};
use crate::error::Error;
use crate::version::split_name_version;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

impl Resolver<'_> {
    /// Resolve `name` (and everything depending on it) for removal
    ///
    /// Returns whether the item is absent or will be removed.
    pub fn process_removal(&mut self, requested: &str, catalogs: &[String]) -> bool {
        if self.is_cancelled() {
            return false;
        }
        debug!("Processing {} for removal", requested);

        let (name, included_version) = split_name_version(requested);
        if self.state.install_processed_for_base(&name) {
            let err = Error::ConflictingDecision(name.clone());
            self.state
                .warn(format!("Will not attempt to remove {}: {}", name, err));
            return false;
        }
        if self.state.processed_uninstalls.contains(&name) {
            debug!("{} has already been processed for removal", name);
            return true;
        }
        if self.removals_in_progress.contains(&name) {
            self.state.warn(Error::CycleDetected(requested.to_string()).to_string());
            return false;
        }

        let candidates = if included_version.is_empty() {
            self.catalogs.all_items_with_name(&name, catalogs)
        } else {
            self.selector
                .resolve(&self.catalogs, &name, catalogs, Some(&included_version))
                .into_iter()
                .collect()
        };
        if candidates.is_empty() {
            self.state.warn(format!(
                "Could not process item {} for removal: no pkginfo found in catalogs {}",
                requested,
                catalogs.join(", ")
            ));
            return false;
        }

        let target = candidates.into_iter().find(|item| {
            let found = self.has_install_evidence(item);
            if !found {
                debug!("{}-{} not installed", item.name, item.version);
            }
            found
        });
        let Some(target) = target else {
            info!("{} doesn't appear to be installed", requested);
            self.state.removals.push(OutcomeRecord {
                name: name.clone(),
                installed: false,
                ..Default::default()
            });
            self.state.processed_uninstalls.insert(name);
            return true;
        };

        self.removals_in_progress.insert(name.clone());
        let result = self.remove_item(requested, &target, catalogs);
        self.removals_in_progress.remove(&name);
        if result {
            self.state.processed_uninstalls.insert(name);
        }
        result
    }

    fn has_install_evidence(&mut self, item: &ItemRecord) -> bool {
        self.package_analysis();
        match &self.analysis {
            Some(analysis) => self.detector.evidence_this_is_installed(item, analysis),
            None => false,
        }
    }

    /// Whether the target's uninstall method can be carried out here
    fn uninstall_supported(&mut self, item: &ItemRecord) -> bool {
        if !item.uninstallable {
            return false;
        }
        match &item.uninstall_method {
            None => false,
            Some(UninstallMethod::RemovePackages) => self
                .package_analysis()
                .receipts_for_name
                .get(&item.name)
                .is_some_and(|pkgs| !pkgs.is_empty()),
            Some(UninstallMethod::Vendor(_))
            | Some(UninstallMethod::RemoveCopiedItems)
            | Some(UninstallMethod::RemoveApp)
            | Some(UninstallMethod::UninstallScript) => true,
            Some(UninstallMethod::LocalScript(path)) => {
                is_executable(&self.config.install_root.join(path.trim_start_matches('/')))
            }
        }
    }

    /// Installed items anywhere in `catalogs` whose `requires` names the target
    fn installed_dependents(&mut self, target: &ItemRecord, catalogs: &[String]) -> Vec<String> {
        let forms = [
            target.name.clone(),
            format!("{}-{}", target.name, target.version),
            format!("{}--{}", target.name, target.version),
        ];
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for index in self.catalogs.ordered(catalogs) {
            for item in index.items() {
                if !seen.insert(item.name.clone()) {
                    continue;
                }
                if item.requires.iter().any(|r| forms.contains(r)) {
                    candidates.push(item.clone());
                }
            }
        }

        candidates
            .into_iter()
            .filter(|item| {
                debug!("{} requires {}, checking whether it is installed", item.name, target.name);
                self.has_install_evidence(item)
            })
            .map(|item| item.name)
            .collect()
    }

    fn remove_item(&mut self, requested: &str, item: &ItemRecord, catalogs: &[String]) -> bool {
        if !self.uninstall_supported(item) {
            self.state
                .warn(format!("Could not find uninstall info for {}", requested));
            return false;
        }

        for dependent in self.installed_dependents(item, catalogs) {
            if self.is_cancelled() {
                return false;
            }
            info!("{} requires {} and must be removed as well", dependent, item.name);
            if !self.process_removal(&dependent, catalogs) {
                let err = Error::DependencyUnresolved {
                    name: requested.to_string(),
                    detail: format!("could not remove dependent item {}", dependent),
                };
                self.state.warn(err.to_string());
                return false;
            }
        }

        let mut record = OutcomeRecord::for_item(item);
        record.description = Some("Will be removed.".to_string());
        record.installs = item.installs.clone();
        record.requires = item.requires.clone();
        record.update_for = item.update_for.clone();
        record.uninstall_method = item.uninstall_method.clone();

        if item.unattended_uninstall || item.forced_uninstall {
            match item.restart_action.filter(|a| *a != RestartAction::None) {
                Some(action) => self.state.warn(format!(
                    "Ignoring unattended_uninstall key for {} because RestartAction is {:?}",
                    item.name, action
                )),
                None => record.unattended_uninstall = true,
            }
        }

        match &item.uninstall_method {
            Some(UninstallMethod::RemovePackages) => {
                let packages = self
                    .package_analysis()
                    .receipts_for_name
                    .get(&item.name)
                    .cloned()
                    .unwrap_or_default();
                let orphaned = self.package_analysis().release_packages(&item.name, &packages);
                if orphaned.is_empty() {
                    self.state.warn(format!(
                        "Could not find unique packages to remove for {}",
                        item.name
                    ));
                    return false;
                }
                record.packages = orphaned;
            }
            Some(UninstallMethod::Vendor(_)) => match self.download_payload(item, true) {
                Ok(basename) => record.uninstaller_item = Some(basename),
                Err(e) => {
                    self.state.warn(format!(
                        "Failed to download the uninstaller for {}: {}",
                        item.name, e
                    ));
                    return false;
                }
            },
            Some(UninstallMethod::RemoveCopiedItems) => {
                record.items_to_remove = item.items_to_copy.clone();
            }
            Some(UninstallMethod::RemoveApp) => {
                record.remove_app_info = item.installs.first().cloned();
            }
            Some(UninstallMethod::UninstallScript) => {
                record.uninstall_script = Some(item.uninstall_script.clone().unwrap_or_default());
            }
            Some(UninstallMethod::LocalScript(_)) | None => {}
        }

        // Updates for a removed item go with it
        let mut updaters = self.catalogs.updaters_for(&item.name, catalogs);
        for extra in self
            .catalogs
            .updaters_for_version(&item.name, &item.version, catalogs)
        {
            if !updaters.contains(&extra) {
                updaters.push(extra);
            }
        }
        for updater in updaters {
            if self.is_cancelled() {
                return false;
            }
            self.process_removal(&updater, catalogs);
        }

        record.installed = true;
        record.installed_version = Some(item.version.clone());
        record.restart_action = item.restart_action;
        self.state.removals.push(record);
        info!("Removal of {} added to the action list", requested);
        true
    }
}
