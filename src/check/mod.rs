// src/check/mod.rs

//! Top-level check run
//!
//! [`CheckOrchestrator::run`] is the only place with side effects beyond the
//! resolver: it picks the primary manifest, walks it once per list key in a
//! fixed order, applies implicit removals and self-service choices, then
//! persists the resulting plan and prunes the local caches to match it.
//!
//! # Phases
//!
//! 1. `managed_installs`
//! 2. `managed_uninstalls`
//! 3. autoremovals from the primary manifest's catalogs
//! 4. `managed_updates`
//! 5. `optional_installs`
//! 6. the self-service manifest
//!
//! A cancelled run persists nothing.

pub mod cache;
pub mod lock;
pub mod report;

pub use lock::RunLock;
pub use report::CheckReport;

use crate::cancel::CancellationToken;
use crate::catalog::ItemSelector;
use crate::config::Config;
use crate::detect::{InstalledStateDetector, VendorUpdates};
use crate::error::{Error, Result};
use crate::facts::{Facts, MachineFacts};
use crate::fetch::Fetcher;
use crate::manifest::{Manifest, ManifestKey, ManifestWalker, read_manifest, write_manifest};
use crate::repo::{RepoSource, discard_malformed};
use crate::resolver::{DiskSpace, InstallInfo, OutcomeRecord, Resolver};
use crate::scheduler::ForceInstallScheduler;
use chrono::{Local, NaiveDateTime};
use std::collections::HashSet;
use std::fs;
use tracing::{debug, error, info, warn};

/// Manifest tried last when no client identifier matches
pub const SITE_DEFAULT_MANIFEST: &str = "site_default";

/// Label used for the self-service manifest in logs and warnings
const SELF_SERVE_LABEL: &str = "SelfServeManifest";

/// Result of a completed check
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub report: CheckReport,
    pub install_info: InstallInfo,
    /// Whether InstallInfo was rewritten this run
    pub install_info_changed: bool,
}

impl CheckOutcome {
    /// Whether there is anything to install or remove
    pub fn pending(&self) -> bool {
        !self.install_info.managed_installs.is_empty() || !self.install_info.removals.is_empty()
    }

    /// Process exit status: 1 when work is pending, else 0
    pub fn exit_code(&self) -> i32 {
        if self.pending() { 1 } else { 0 }
    }
}

/// Sequences a full check run
pub struct CheckOrchestrator<'a> {
    config: &'a Config,
    source: &'a dyn RepoSource,
    fetcher: &'a dyn Fetcher,
    disk: &'a dyn DiskSpace,
    vendor: &'a dyn VendorUpdates,
    machine: MachineFacts,
    cancel: CancellationToken,
    clock: Option<NaiveDateTime>,
}

impl<'a> CheckOrchestrator<'a> {
    pub fn new(
        config: &'a Config,
        source: &'a dyn RepoSource,
        fetcher: &'a dyn Fetcher,
        disk: &'a dyn DiskSpace,
        vendor: &'a dyn VendorUpdates,
        machine: MachineFacts,
    ) -> Self {
        Self {
            config,
            source,
            fetcher,
            disk,
            vendor,
            machine,
            cancel: CancellationToken::new(),
            clock: None,
        }
    }

    /// Use `cancel` to stop the run from elsewhere
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Evaluate force-install deadlines at a fixed time instead of now
    pub fn with_clock(mut self, now: NaiveDateTime) -> Self {
        self.clock = Some(now);
        self
    }

    fn now(&self) -> NaiveDateTime {
        self.clock.unwrap_or_else(|| Local::now().naive_local())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run a check
    ///
    /// `client_id` overrides the configured client identifier.
    pub fn run(&self, client_id: Option<&str>) -> Result<CheckOutcome> {
        info!("Beginning managed software check");
        let mut report = CheckReport {
            start_time: timestamp(),
            ..Default::default()
        };

        let mut facts = Facts::new(&self.machine);
        facts.load_conditions(&self.config.conditions_path());

        let selector = ItemSelector::new(self.machine.os_version.clone(), self.machine.arch.clone());
        let detector = InstalledStateDetector::from_system(&self.config.install_root, self.vendor);
        let mut resolver = Resolver::new(
            self.config,
            selector,
            detector,
            self.fetcher,
            self.disk,
            self.cancel.clone(),
        );

        let primary = {
            let mut walker = ManifestWalker::new(&mut resolver, self.source, &facts);
            match self.primary_manifest(&mut walker, client_id)? {
                Some((name, manifest)) => {
                    self.walk_all(&mut walker, &name, &manifest)?;
                    Some(name)
                }
                None => None,
            }
        };
        self.check_cancelled()?;

        let Some(manifest_name) = primary else {
            return self.fall_back(report);
        };
        report.manifest_name = Some(manifest_name);

        let loaded_catalogs: Vec<String> = resolver.catalogs().names().map(str::to_string).collect();
        let state = resolver.into_state();

        let installed_items: Vec<String> = state
            .managed_installs
            .iter()
            .filter(|r| r.installed)
            .map(|r| r.name.clone())
            .collect();
        let problem_items: Vec<OutcomeRecord> = state
            .managed_installs
            .iter()
            .filter(|r| !r.installed && r.installer_item.is_none())
            .cloned()
            .collect();
        let removed_items: Vec<String> = state
            .removals
            .iter()
            .filter(|r| !r.installed)
            .map(|r| r.name.clone())
            .collect();
        self.prune_self_service_uninstalls(&removed_items);

        report.managed_installs = state.managed_installs.clone();
        report.installed_items = installed_items;
        report.problem_installs = problem_items;
        report.removed_items = removed_items;
        report.managed_installs_list = sorted(&state.processed_installs);
        report.managed_uninstalls_list = sorted(&state.processed_uninstalls);
        report.managed_updates_list = sorted(&state.managed_updates);

        // Only items that need action go into the plan
        let mut managed_installs: Vec<OutcomeRecord> = state
            .managed_installs
            .into_iter()
            .filter(|r| r.installer_item.is_some())
            .collect();
        let removals: Vec<OutcomeRecord> = state.removals.into_iter().filter(|r| r.installed).collect();

        let scheduler = ForceInstallScheduler::new(self.config.force_install_warning_hours);
        let (urgency, mutated) = scheduler.evaluate(&mut managed_installs, self.now());
        if mutated {
            info!("Force-install deadlines switched items to unattended install");
        }
        report.force_install_urgency = urgency.map(|u| u.to_string());

        let keep: HashSet<String> = managed_installs
            .iter()
            .filter_map(|r| r.installer_item.clone())
            .chain(removals.iter().filter_map(|r| r.uninstaller_item.clone()))
            .collect();
        cache::prune_catalogs(&self.config.catalogs_dir(), loaded_catalogs.iter().map(String::as_str));
        cache::prune_cache(&self.config.cache_dir(), &keep, !report.problem_installs.is_empty());

        let install_info = InstallInfo {
            managed_installs,
            removals,
            optional_installs: state.optional_installs,
            managed_updates: sorted(&state.managed_updates),
        };
        let changed = install_info.save_if_changed(&self.config.install_info_path())?;
        if !changed {
            debug!("No change in InstallInfo");
        }

        report.items_to_install = install_info.managed_installs.clone();
        report.items_to_remove = install_info.removals.clone();
        report.note_restart_actions();
        report.warnings = state.warnings;
        report.end_time = timestamp();
        report.save(&self.config.report_path())?;

        info!("Finished managed software check");
        Ok(CheckOutcome {
            report,
            install_info,
            install_info_changed: changed,
        })
    }

    // =========================================================================
    // Primary manifest
    // =========================================================================

    /// Candidate primary manifest names, in the order they are tried
    fn primary_candidates(&self, client_id: Option<&str>) -> Vec<String> {
        if let Some(id) = client_id
            .map(str::to_string)
            .or_else(|| self.config.client_identifier.clone())
            .filter(|id| !id.is_empty())
        {
            return vec![id];
        }
        let mut names = vec![self.machine.hostname.clone()];
        let short = self.machine.short_hostname().to_string();
        if !names.contains(&short) {
            names.push(short);
        }
        names.push(SITE_DEFAULT_MANIFEST.to_string());
        names
    }

    fn primary_manifest(
        &self,
        walker: &mut ManifestWalker<'_, '_>,
        client_id: Option<&str>,
    ) -> Result<Option<(String, Manifest)>> {
        for name in self.primary_candidates(client_id) {
            self.check_cancelled()?;
            match walker.manifest(&name) {
                Ok(manifest) => {
                    info!("Using manifest: {}", name);
                    return Ok(Some((name, manifest)));
                }
                Err(e) => debug!("Request for manifest {} failed: {}", name, e),
            }
        }
        Ok(None)
    }

    /// No primary manifest: report the last persisted plan
    fn fall_back(&self, mut report: CheckReport) -> Result<CheckOutcome> {
        error!("{}", Error::NoPrimaryManifest);
        let Some(install_info) = InstallInfo::load(&self.config.install_info_path()) else {
            return Err(Error::NoPrimaryManifest);
        };
        info!("Using the action list from a previous run");

        report.warnings.push(Error::NoPrimaryManifest.to_string());
        report.items_to_install = install_info.managed_installs.clone();
        report.items_to_remove = install_info.removals.clone();
        report.note_restart_actions();
        report.end_time = timestamp();
        report.save(&self.config.report_path())?;

        Ok(CheckOutcome {
            report,
            install_info,
            install_info_changed: false,
        })
    }

    // =========================================================================
    // Phases
    // =========================================================================

    fn walk_all(&self, walker: &mut ManifestWalker<'_, '_>, name: &str, primary: &Manifest) -> Result<()> {
        info!("Checking for installs");
        walker.walk_named(name, ManifestKey::ManagedInstalls, &[])?;

        info!("Checking for removals");
        walker.walk_named(name, ManifestKey::ManagedUninstalls, &[])?;

        let catalogs = &primary.catalogs;
        let autoremovals: Vec<String> = {
            let resolver = walker.resolver();
            resolver
                .catalogs()
                .autoremove_names(catalogs)
                .into_iter()
                .filter(|n| {
                    !resolver.state.install_processed_for_base(n)
                        && !resolver.state.processed_uninstalls.contains(n)
                })
                .collect()
        };
        if !autoremovals.is_empty() {
            info!("Checking for implicit removals");
        }
        for item in &autoremovals {
            self.check_cancelled()?;
            walker.resolver().process_removal(item, catalogs);
        }

        info!("Checking for managed updates");
        walker.walk_named(name, ManifestKey::ManagedUpdates, &[])?;

        walker.walk_named(name, ManifestKey::OptionalInstalls, &[])?;

        self.apply_self_service(walker, catalogs)
    }

    // =========================================================================
    // Self-service
    // =========================================================================

    /// Move the user's self-service choices into the managed install directory
    fn adopt_user_manifest(&self, walker: &mut ManifestWalker<'_, '_>) {
        let user_path = self.config.self_serve_user_path();
        if !user_path.exists() {
            return;
        }
        match read_manifest(&user_path) {
            Ok(manifest) => {
                let dest = self.config.self_serve_path();
                let written = dest
                    .parent()
                    .map_or(Ok(()), fs::create_dir_all)
                    .map_err(Error::from)
                    .and_then(|()| write_manifest(&dest, &manifest));
                if let Err(e) = written {
                    walker
                        .resolver()
                        .state
                        .warn(format!("Could not copy {}: {}", user_path.display(), e));
                    return;
                }
            }
            Err(e) => walker
                .resolver()
                .state
                .warn(format!("Could not read {}: {}", user_path.display(), e)),
        }
        if let Err(e) = fs::remove_file(&user_path) {
            warn!("Could not remove {}: {}", user_path.display(), e);
        }
    }

    fn apply_self_service(&self, walker: &mut ManifestWalker<'_, '_>, catalogs: &[String]) -> Result<()> {
        self.adopt_user_manifest(walker);

        let path = self.config.self_serve_path();
        if !path.exists() {
            return Ok(());
        }
        let manifest = match read_manifest(&path) {
            Ok(manifest) => manifest,
            Err(e) => {
                discard_malformed(&path, &e);
                return Ok(());
            }
        };
        info!("Processing self-serve choices");

        // Only choices still offered as optional installs are honoured
        let available: HashSet<String> = walker
            .resolver()
            .state
            .optional_installs
            .iter()
            .map(|r| r.name.clone())
            .collect();
        for item in &manifest.managed_installs {
            self.check_cancelled()?;
            if available.contains(item) {
                walker.resolver().process_install(item, catalogs);
            } else {
                debug!("{} is no longer offered for self-service install", item);
            }
        }

        walker.walk(&manifest, SELF_SERVE_LABEL, ManifestKey::ManagedUninstalls, catalogs)?;

        let state = &mut walker.resolver().state;
        let installing: HashSet<&str> = state.managed_installs.iter().map(|r| r.name.as_str()).collect();
        let removing: HashSet<&str> = state.removals.iter().map(|r| r.name.as_str()).collect();
        for record in state.optional_installs.iter_mut() {
            if !record.installed && installing.contains(record.name.as_str()) {
                record.will_be_installed = true;
            } else if record.installed && removing.contains(record.name.as_str()) {
                record.will_be_removed = true;
            }
        }
        Ok(())
    }

    /// Drop self-service uninstalls for items that are already gone
    fn prune_self_service_uninstalls(&self, removed_items: &[String]) {
        let path = self.config.self_serve_path();
        if !path.exists() {
            return;
        }
        let Ok(mut manifest) = read_manifest(&path) else {
            return;
        };
        let before = manifest.managed_uninstalls.len();
        manifest
            .managed_uninstalls
            .retain(|name| !removed_items.contains(name));
        if manifest.managed_uninstalls.len() != before {
            if let Err(e) = write_manifest(&path, &manifest) {
                warn!("Could not update {}: {}", path.display(), e);
            }
        }
    }
}

fn sorted(names: &HashSet<String>) -> Vec<String> {
    let mut names: Vec<String> = names.iter().cloned().collect();
    names.sort();
    names
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S %z").to_string()
}
