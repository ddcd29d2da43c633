// src/resolver/install.rs

//! Install-side resolution: managed installs, managed updates and optional
//! installs, plus the payload download and free-space precheck they share.

use super::Resolver;
use super::state::OutcomeRecord;
use crate::catalog::{ItemRecord, RestartAction};
use crate::catalog::item::location_basename;
use crate::detect::{InstalledState, UNKNOWN_VERSION};
use crate::error::Error;
use crate::fetch::{FetchError, FetchOptions};
use crate::repo::encode_path;
use crate::version::split_name_version;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Safety margin added to every free-space estimate (100 MB, in KB)
const DISK_FUDGE_KB: u64 = 102_400;

/// Why an installer or uninstaller payload isn't available
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("No {0} in item info")]
    NoLocation(&'static str),

    #[error("Insufficient disk space to download and install {0}")]
    InsufficientSpace(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl PayloadError {
    /// Short explanation stored on the outcome record
    pub fn note(&self) -> String {
        match self {
            Self::Fetch(FetchError::Verification { .. }) => "Integrity check failed".to_string(),
            Self::Fetch(e) => format!("Download failed ({})", e),
            other => other.to_string(),
        }
    }
}

impl From<PayloadError> for Error {
    fn from(e: PayloadError) -> Self {
        match e {
            PayloadError::Fetch(f) => f.into(),
            other => Error::Download(other.to_string()),
        }
    }
}

impl Resolver<'_> {
    // =========================================================================
    // Managed installs
    // =========================================================================

    /// Resolve `name` (and everything it requires) for install
    ///
    /// Returns whether the item is installed or will be. Failures are
    /// recorded as warnings and never abort sibling requests.
    pub fn process_install(&mut self, name: &str, catalogs: &[String]) -> bool {
        if self.is_cancelled() {
            return false;
        }
        debug!("Processing {} for install", name);

        if self.state.processed_installs.contains(name) {
            debug!("{} has already been processed for install", name);
            return true;
        }
        if self.state.removal_processed_for_base(name) {
            self.state.warn(format!(
                "Will not process {} for install because it has already been processed for removal",
                name
            ));
            return false;
        }

        let item = match self.selector.resolve(&self.catalogs, name, catalogs, None) {
            Ok(item) => item,
            Err(e) => {
                self.state
                    .warn(format!("Could not process item {} for install: {}", name, e));
                return false;
            }
        };

        if self.state.is_scheduled_for_install(&item.name, &item.version) {
            debug!("{} is or will be installed", name);
            return true;
        }

        if !self.installs_in_progress.insert(item.name.clone()) {
            self.state.warn(Error::CycleDetected(name.to_string()).to_string());
            return false;
        }
        let result = self.install_item(name, &item, catalogs);
        self.installs_in_progress.remove(&item.name);
        result
    }

    fn install_item(&mut self, requested: &str, item: &ItemRecord, catalogs: &[String]) -> bool {
        let mut unresolved = Vec::new();
        for dependency in &item.requires {
            if self.is_cancelled() {
                return false;
            }
            debug!("{}-{} requires {}", item.name, item.version, dependency);
            if !self.process_install(dependency, catalogs) {
                unresolved.push(dependency.as_str());
            }
        }
        if !unresolved.is_empty() {
            let err = Error::DependencyUnresolved {
                name: requested.to_string(),
                detail: format!("could not install {}", unresolved.join(", ")),
            };
            self.state.warn(err.to_string());
            return false;
        }

        let mut record = OutcomeRecord::for_item(item);
        record.installer_item_size = Some(item.installer_item_size.unwrap_or(0));
        record.installed_size = Some(
            item.installed_size
                .or(item.installer_item_size)
                .unwrap_or(0),
        );

        let installed_state = self.detector.installed_state(item);
        let version_for_updaters;
        if installed_state.needs_install() {
            info!("Need to install {}", requested);
            self.copy_install_keys(item, &mut record);
            record.installed = false;
            record.version_to_install = Some(item.version.clone());

            match self.download_payload(item, false) {
                Ok(basename) => record.installer_item = Some(basename),
                Err(e) => {
                    self.state
                        .warn(format!("Can't install {} because: {}", requested, e));
                    record.note = Some(e.note());
                    self.state.managed_installs.push(record);
                    return false;
                }
            }
            version_for_updaters = Some(item.version.clone());
        } else {
            record.installed = true;
            let installed_version = if installed_state == InstalledState::Same {
                item.version.clone()
            } else {
                match self.detector.installed_version(item) {
                    v if v == UNKNOWN_VERSION => format!("(newer than {})", item.version),
                    v => v,
                }
            };
            info!(
                "{} version {} (or newer) is already installed",
                item.name, item.version
            );
            version_for_updaters =
                Some(installed_version.clone()).filter(|v| !v.starts_with('('));
            record.installed_version = Some(installed_version);
        }

        self.state.managed_installs.push(record);
        if !self.state.managed_updates.contains(requested) {
            self.state.processed_installs.insert(requested.to_string());
        }

        self.pull_updaters(requested, version_for_updaters.as_deref(), catalogs);
        true
    }

    /// Keys the installer needs, copied onto a pending install
    fn copy_install_keys(&mut self, item: &ItemRecord, record: &mut OutcomeRecord) {
        record.restart_action = item.restart_action;
        record.installer_type = item.installer_type.clone();
        record.installs = item.installs.clone();
        record.receipts = item.receipts.clone();
        record.requires = item.requires.clone();
        record.update_for = item.update_for.clone();
        record.minimum_os_version = item.minimum_os_version.clone();
        record.force_install_after_date = item.force_install_after_date;

        if item.unattended_install || item.forced_install {
            match item.restart_action.filter(|a| *a != RestartAction::None) {
                Some(action) => self.state.warn(format!(
                    "Ignoring unattended_install key for {} because RestartAction is {:?}",
                    item.name, action
                )),
                None => record.unattended_install = true,
            }
        }
    }

    /// Process updater items targeting a just-decided install
    fn pull_updaters(&mut self, requested: &str, version: Option<&str>, catalogs: &[String]) {
        let (name, included_version) = split_name_version(requested);
        let updaters = if !included_version.is_empty() {
            self.catalogs
                .updaters_for_version(&name, &included_version, catalogs)
        } else {
            let mut updaters = self.catalogs.updaters_for(&name, catalogs);
            if let Some(version) = version {
                for extra in self.catalogs.updaters_for_version(&name, version, catalogs) {
                    if !updaters.contains(&extra) {
                        updaters.push(extra);
                    }
                }
            }
            updaters
        };

        for updater in updaters {
            if self.is_cancelled() {
                return;
            }
            debug!("Found updater {} for {}", updater, name);
            self.process_install(&updater, catalogs);
        }
    }

    // =========================================================================
    // Managed updates and optional installs
    // =========================================================================

    /// Install `name` only if some version of it is already present
    pub fn process_managed_update(&mut self, name: &str, catalogs: &[String]) {
        if self.is_cancelled() {
            return;
        }
        debug!("Processing {} for update", name);

        if self.state.managed_updates.contains(name) {
            debug!("{} has already been processed for update", name);
            return;
        }
        if self.state.processed_installs.contains(name) {
            debug!("{} has already been processed for install", name);
            return;
        }
        if self.state.processed_uninstalls.contains(name) {
            debug!("{} has already been processed for removal", name);
            return;
        }

        let item = match self.selector.resolve(&self.catalogs, name, catalogs, None) {
            Ok(item) => item,
            Err(e) => {
                self.state
                    .warn(format!("Could not process item {} for update: {}", name, e));
                return;
            }
        };

        if self.detector.some_version_installed(&item) {
            self.state.managed_updates.insert(name.to_string());
            self.process_install(name, catalogs);
        } else {
            debug!("{} does not appear to be installed, so no managed updates", name);
        }
    }

    /// Record `name` as an optional-install candidate
    ///
    /// Nothing is downloaded; the record only describes what an install
    /// would involve.
    pub fn process_optional_install(&mut self, name: &str, catalogs: &[String]) {
        if self.is_cancelled() {
            return;
        }
        debug!("Processing {} for optional install", name);

        if self.state.optional_installs_seen.contains(name)
            || self.state.optional_installs.iter().any(|r| r.name == name)
        {
            debug!("{} has already been processed for optional install", name);
            return;
        }
        if self.state.processed_installs.contains(name)
            || self.state.processed_uninstalls.contains(name)
        {
            debug!("{} has already been processed for install or removal", name);
            return;
        }

        let item = match self.selector.resolve(&self.catalogs, name, catalogs, None) {
            Ok(item) => item,
            Err(e) => {
                self.state.warn(format!(
                    "Could not process item {} for optional install: {}",
                    name, e
                ));
                return;
            }
        };

        let mut record = OutcomeRecord::for_item(&item);
        record.version_to_install = Some(item.version.clone());
        record.installed = self.detector.some_version_installed(&item);
        if record.installed {
            record.needs_update = Some(self.detector.installed_state(&item).needs_install());
        }
        record.uninstallable = Some(item.uninstallable);

        if !record.installed || record.needs_update == Some(true) {
            let size = item.installer_item_size.unwrap_or(0);
            record.installer_item_size = Some(size);
            record.installed_size = Some(item.installed_size.unwrap_or(size));
            if !self.enough_disk_space(&item, false, false) {
                record.note = Some("Insufficient disk space to download and install.".to_string());
            }
        }

        debug!("Adding {} to the optional install list", record.name);
        self.state.optional_installs_seen.insert(name.to_string());
        self.state.optional_installs.push(record);
    }

    // =========================================================================
    // Payloads
    // =========================================================================

    /// Whether the cache volume can hold `item`'s payload and footprint
    ///
    /// Space claimed by installs already queued in this run is subtracted
    /// from what the volume reports.
    pub(crate) fn enough_disk_space(&self, item: &ItemRecord, uninstalling: bool, report: bool) -> bool {
        let already_downloaded = item
            .installer_item_location
            .as_deref()
            .map(|loc| self.config.cache_dir().join(location_basename(loc)))
            .and_then(|path| std::fs::metadata(path).ok())
            .map(|m| m.len() / 1024)
            .unwrap_or(0);

        let mut item_size = item.installer_item_size.unwrap_or(0);
        let mut installed_size = item.installed_size.unwrap_or(item_size);
        if uninstalling {
            installed_size = 0;
            if let Some(size) = item.uninstaller_item_size {
                item_size = size;
            }
        }
        let needed = (item_size + installed_size + DISK_FUDGE_KB).saturating_sub(already_downloaded);

        let reserved: u64 = self
            .state
            .managed_installs
            .iter()
            .filter(|r| r.installer_item.is_some())
            .map(|r| r.installed_size.unwrap_or(0))
            .sum();
        let available = self.disk.available_kbytes().saturating_sub(reserved);

        if available > needed {
            return true;
        }
        if report {
            let what = if uninstalling {
                "download the uninstaller for"
            } else {
                "download and install"
            };
            warn!(
                "There is insufficient disk space to {} {}: {}MB needed, {}MB available",
                what,
                item.name,
                needed / 1024,
                available / 1024
            );
        }
        false
    }

    /// Download an item's installer (or uninstaller) into the cache
    ///
    /// Returns the cache basename. The free-space precheck only runs when
    /// nothing is cached under that name yet.
    pub(crate) fn download_payload(
        &mut self,
        item: &ItemRecord,
        uninstalling: bool,
    ) -> Result<String, PayloadError> {
        let (location, hash) = match (uninstalling, item.uninstaller_item_location.as_deref()) {
            (true, Some(location)) => (location, item.uninstaller_item_hash.clone()),
            _ => match item.installer_item_location.as_deref() {
                Some(location) => (location, item.installer_item_hash.clone()),
                None => return Err(PayloadError::NoLocation("installer_item_location")),
            },
        };

        let url = match item.package_complete_url.as_deref() {
            Some(url) => url.to_string(),
            None => format!(
                "{}/{}",
                self.config.package_base_url().trim_end_matches('/'),
                encode_path(location.trim_start_matches('/'))
            ),
        };
        let basename = location_basename(location);
        let dest = self.config.cache_dir().join(&basename);

        if !dest.exists() && !self.enough_disk_space(item, uninstalling, true) {
            return Err(PayloadError::InsufficientSpace(basename));
        }

        debug!("Downloading {} from {}", basename, url);
        let options = FetchOptions {
            resume: true,
            verify: true,
            expected_hash: hash,
            headers: Vec::new(),
            message: Some(format!("Downloading {}...", basename)),
        };
        let changed = self.fetcher.fetch_if_changed(&url, &dest, &options)?;
        if changed {
            info!("Downloaded {}", basename);
        }
        Ok(basename)
    }
}
