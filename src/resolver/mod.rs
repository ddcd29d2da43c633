// src/resolver/mod.rs

//! Install and removal resolution
//!
//! A [`Resolver`] owns everything one check run needs: the loaded catalogs,
//! the machine's eligibility facts, an installed-state snapshot, the
//! collaborators used for payload downloads and free-space checks, and the
//! [`ResolutionState`] the run builds up.
//!
//! # Memoization and cycles
//!
//! Names are added to `processed_installs` / `processed_uninstalls` only once
//! they have been decided successfully, so a request that fails for one
//! catalog list can succeed later with another. Recursion is bounded by a
//! separate in-progress set per direction: re-entering a name that is still
//! being resolved is reported as a cycle and fails the requesting item.

mod install;
mod removal;
pub mod state;

pub use install::PayloadError;
pub use state::{InstallInfo, OutcomeRecord, ResolutionState};

use crate::cancel::CancellationToken;
use crate::catalog::{CatalogSet, ItemRecord, ItemSelector};
use crate::config::Config;
use crate::detect::{InstalledStateDetector, PackageAnalysis};
use crate::fetch::Fetcher;
use crate::repo::RepoSource;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Free-space collaborator
pub trait DiskSpace {
    /// Kilobytes available to the download cache
    fn available_kbytes(&self) -> u64;
}

/// Free space on the filesystem holding a path
#[derive(Debug, Clone)]
pub struct FsDiskSpace {
    path: PathBuf,
}

impl FsDiskSpace {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DiskSpace for FsDiskSpace {
    fn available_kbytes(&self) -> u64 {
        // The cache directory may not exist yet; measure the nearest ancestor
        let existing = self
            .path
            .ancestors()
            .find(|p| p.exists())
            .unwrap_or(&self.path);
        match fs2::available_space(existing) {
            Ok(bytes) => bytes / 1024,
            Err(e) => {
                warn!("Could not determine free space on {}: {}", existing.display(), e);
                0
            }
        }
    }
}

/// Per-run resolution context
pub struct Resolver<'a> {
    config: &'a Config,
    catalogs: CatalogSet,
    selector: ItemSelector,
    detector: InstalledStateDetector,
    analysis: Option<PackageAnalysis>,
    fetcher: &'a dyn Fetcher,
    disk: &'a dyn DiskSpace,
    cancel: CancellationToken,
    installs_in_progress: HashSet<String>,
    removals_in_progress: HashSet<String>,
    pub state: ResolutionState,
}

impl<'a> Resolver<'a> {
    pub fn new(
        config: &'a Config,
        selector: ItemSelector,
        detector: InstalledStateDetector,
        fetcher: &'a dyn Fetcher,
        disk: &'a dyn DiskSpace,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            catalogs: CatalogSet::new(),
            selector,
            detector,
            analysis: None,
            fetcher,
            disk,
            cancel,
            installs_in_progress: HashSet::new(),
            removals_in_progress: HashSet::new(),
            state: ResolutionState::new(),
        }
    }

    pub fn config(&self) -> &Config {
        self.config
    }

    pub fn catalogs(&self) -> &CatalogSet {
        &self.catalogs
    }

    pub fn selector(&self) -> &ItemSelector {
        &self.selector
    }

    pub fn detector(&self) -> &InstalledStateDetector {
        &self.detector
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Add an already-parsed catalog
    pub fn add_catalog(&mut self, name: impl Into<String>, items: Vec<ItemRecord>) {
        self.catalogs.insert(name, items);
        // Receipt ownership depends on every loaded catalog
        self.analysis = None;
    }

    /// Load any of `names` not already loaded
    ///
    /// Catalogs that can't be retrieved are skipped with a warning.
    pub fn load_catalogs(&mut self, source: &dyn RepoSource, names: &[String]) {
        for name in names {
            if self.is_cancelled() {
                return;
            }
            if self.catalogs.contains(name) {
                continue;
            }
            match source.catalog(name) {
                Ok(items) => self.add_catalog(name.clone(), items),
                Err(e) => self
                    .state
                    .warn(format!("Could not retrieve catalog {}: {}", name, e)),
            }
        }
    }

    /// Receipt analysis over every loaded catalog, computed on first use
    fn package_analysis(&mut self) -> &mut PackageAnalysis {
        self.analysis.get_or_insert_with(|| {
            debug!("Analyzing installed packages");
            PackageAnalysis::analyze(&self.catalogs, self.detector.installed_packages())
        })
    }

    /// Finish the run, handing back its state
    pub fn into_state(self) -> ResolutionState {
        self.state
    }
}
