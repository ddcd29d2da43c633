// src/detect/mod.rs

//! Installed-state detection
//!
//! Decides whether a catalog item (or a newer version of it) is present on
//! this machine. Three strategies, tried in order:
//!
//! - vendor update membership, for items tied to `softwareupdatename`
//! - `installs` descriptors checked on disk (bundles, plists, files)
//! - package `receipts` looked up in the receipt database
//!
//! Items with none of these are assumed present.

pub mod bundle;
pub mod receipts;

pub use receipts::{PackageAnalysis, RECEIPTS_DIR, read_receipt_database};

use crate::catalog::{InstallsItem, ItemRecord, Receipt, UninstallMethod};
use crate::version::{VersionComparison, compare_versions};
use bundle::{AppInfo, bundle_info_plist, read_plist_dict, scan_applications, version_string};
use md5::{Digest, Md5};
use std::cell::OnceCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Version placeholder when the installed version can't be determined
pub const UNKNOWN_VERSION: &str = "UNKNOWN";

/// Errors raised by malformed detection descriptors
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Missing bundle path or version in installs item")]
    MissingBundleInfo,

    #[error("Missing plist path or version in installs item")]
    MissingPlistInfo,

    #[error("No path specified for filesystem item")]
    MissingPath,

    #[error("No application name or bundle identifier was specified")]
    MissingApplicationInfo,

    #[error("Unknown installs item type: {0}")]
    UnknownType(String),

    #[error("Receipt is missing a package id or version")]
    MalformedReceipt,
}

/// Presence of an item on this machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstalledState {
    Absent,
    Older,
    Same,
    Newer,
}

impl InstalledState {
    /// Whether this state calls for an install
    pub fn needs_install(self) -> bool {
        matches!(self, Self::Absent | Self::Older)
    }
}

impl From<VersionComparison> for InstalledState {
    fn from(cmp: VersionComparison) -> Self {
        match cmp {
            VersionComparison::Older => Self::Older,
            VersionComparison::Same => Self::Same,
            VersionComparison::Newer => Self::Newer,
        }
    }
}

/// Source of pending vendor (OS) updates
pub trait VendorUpdates {
    /// Names of vendor updates currently available for this machine
    fn available_update_names(&self) -> Vec<String>;
}

/// Vendor update source that never reports anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVendorUpdates;

impl VendorUpdates for NoVendorUpdates {
    fn available_update_names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Probes the machine for installed items
#[derive(Debug)]
pub struct InstalledStateDetector {
    root: PathBuf,
    installed_packages: HashMap<String, String>,
    vendor_updates: HashSet<String>,
    applications: OnceCell<Vec<AppInfo>>,
}

impl InstalledStateDetector {
    /// Create a detector over an explicit snapshot of receipts and vendor updates
    pub fn new(
        root: impl Into<PathBuf>,
        installed_packages: HashMap<String, String>,
        vendor_updates: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            root: root.into(),
            installed_packages,
            vendor_updates: vendor_updates.into_iter().collect(),
            applications: OnceCell::new(),
        }
    }

    /// Snapshot the machine rooted at `root`
    pub fn from_system(root: impl Into<PathBuf>, vendor: &dyn VendorUpdates) -> Self {
        let root = root.into();
        let installed = read_receipt_database(&root.join(RECEIPTS_DIR));
        Self::new(root, installed, vendor.available_update_names())
    }

    /// Installed package versions, keyed by package ID
    pub fn installed_packages(&self) -> &HashMap<String, String> {
        &self.installed_packages
    }

    /// Map an absolute descriptor path onto the detection root
    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn applications(&self) -> &[AppInfo] {
        self.applications
            .get_or_init(|| scan_applications(&self.root.join("Applications")))
    }

    // =========================================================================
    // Item-level checks
    // =========================================================================

    /// Detect the installed state of an item
    ///
    /// The first descriptor reporting Absent or Older decides the result;
    /// Newer is reported only when every descriptor is at least Same. A
    /// malformed descriptor is treated as Absent.
    pub fn installed_state(&self, item: &ItemRecord) -> InstalledState {
        if let Some(update_name) = item.softwareupdatename.as_deref() {
            return if self.vendor_updates.contains(update_name) {
                debug!("Vendor update {} is available", update_name);
                InstalledState::Absent
            } else {
                InstalledState::Same
            };
        }

        let results: Box<dyn Iterator<Item = Result<InstalledState, DetectionError>> + '_> =
            if !item.installs.is_empty() {
                Box::new(item.installs.iter().map(|i| self.compare_installs_item(i)))
            } else if !item.receipts.is_empty() {
                Box::new(item.receipts.iter().map(|r| self.compare_receipt(r)))
            } else {
                return InstalledState::Same;
            };

        let mut found_newer = false;
        for result in results {
            match result {
                Ok(state @ (InstalledState::Absent | InstalledState::Older)) => return state,
                Ok(InstalledState::Newer) => found_newer = true,
                Ok(InstalledState::Same) => {}
                Err(e) => {
                    warn!("{}: {}", item.name, e);
                    return InstalledState::Absent;
                }
            }
        }

        if found_newer {
            InstalledState::Newer
        } else {
            InstalledState::Same
        }
    }

    /// Whether any version of the item is present, old or new
    pub fn some_version_installed(&self, item: &ItemRecord) -> bool {
        if let Some(update_name) = item.softwareupdatename.as_deref() {
            return !self.vendor_updates.contains(update_name);
        }
        if !item.installs.is_empty() {
            return item.installs.iter().all(|i| {
                matches!(self.compare_installs_item(i), Ok(s) if s != InstalledState::Absent)
            });
        }
        item.receipts.iter().all(|r| {
            matches!(self.compare_receipt(r), Ok(s) if s != InstalledState::Absent)
        })
    }

    /// Whether there is evidence any version of the item is installed
    ///
    /// Used for removals, so the check is loose: installs paths only need
    /// to exist, and receipt items only need to appear in the analysis.
    /// Installs entries without a path cannot be checked and are skipped.
    pub fn evidence_this_is_installed(&self, item: &ItemRecord, analysis: &PackageAnalysis) -> bool {
        let by_receipts = item.uninstall_method == Some(UninstallMethod::RemovePackages);
        if !item.installs.is_empty() && !by_receipts {
            let all_on_disk = item
                .installs
                .iter()
                .filter_map(|i| i.path.as_deref())
                .all(|p| self.path_exists(&self.resolve(p)));
            if all_on_disk {
                return true;
            }
        }
        !item.receipts.is_empty() && analysis.installed_names.contains(&item.name)
    }

    /// Best-effort installed version string for an item detected as present
    pub fn installed_version(&self, item: &ItemRecord) -> String {
        for receipt in &item.receipts {
            if receipt.version == item.version {
                if let Some(v) = self.installed_packages.get(&receipt.packageid) {
                    return v.clone();
                }
            }
        }

        for ii in &item.installs {
            if ii.short_version.as_deref() != Some(item.version.as_str()) {
                continue;
            }
            let Some(path) = ii.path.as_deref() else {
                continue;
            };
            let path = self.resolve(path);
            let plist_path = match ii.kind.as_str() {
                "application" | "bundle" => bundle_info_plist(&path),
                "plist" => Some(path),
                _ => None,
            };
            if let Some(version) = plist_path
                .and_then(|p| read_plist_dict(&p))
                .and_then(|d| version_string(&d))
            {
                return version;
            }
        }

        UNKNOWN_VERSION.to_string()
    }

    // =========================================================================
    // Descriptor-level checks
    // =========================================================================

    /// Compare one installs descriptor against what's on disk
    pub fn compare_installs_item(&self, ii: &InstallsItem) -> Result<InstalledState, DetectionError> {
        match ii.kind.as_str() {
            "application" => self.compare_application(ii),
            "bundle" => self.compare_bundle(ii),
            "plist" => self.compare_plist(ii),
            "file" => self.file_state(ii),
            other => Err(DetectionError::UnknownType(other.to_string())),
        }
    }

    fn compare_application(&self, ii: &InstallsItem) -> Result<InstalledState, DetectionError> {
        if let (Some(path), Some(_)) = (ii.path.as_deref(), ii.short_version.as_deref()) {
            if self.resolve(path).join("Contents/Info.plist").exists() {
                return self.compare_bundle(ii);
            }
        }

        let bundle_id = ii.bundle_id.as_deref().unwrap_or_default();
        let name = ii.bundle_name.as_deref().unwrap_or_default();
        if bundle_id.is_empty() && name.is_empty() {
            if ii.path.is_some() {
                // Default location already checked and nothing else to go on
                return Ok(InstalledState::Absent);
            }
            return Err(DetectionError::MissingApplicationInfo);
        }

        let matches: Vec<&AppInfo> = self
            .applications()
            .iter()
            .filter(|app| {
                if !bundle_id.is_empty() {
                    app.bundle_id.as_deref() == Some(bundle_id)
                } else {
                    app.name == name
                }
            })
            .collect();
        if matches.is_empty() {
            debug!("Did not find application {}{} on disk", name, bundle_id);
            return Ok(InstalledState::Absent);
        }

        let wanted = ii.short_version.as_deref().unwrap_or_default();
        for app in matches {
            let Some(installed) = app.version.as_deref() else {
                continue;
            };
            if let Some(minimum) = ii.minimum_update_version.as_deref() {
                if compare_versions(installed, minimum) == VersionComparison::Older {
                    debug!("Version {} too old < {}", installed, minimum);
                    return Ok(InstalledState::Absent);
                }
            }
            match compare_versions(installed, wanted) {
                VersionComparison::Same => return Ok(InstalledState::Same),
                VersionComparison::Newer => return Ok(InstalledState::Newer),
                VersionComparison::Older => {}
            }
        }

        debug!("An older version of this application is present");
        Ok(InstalledState::Older)
    }

    fn compare_bundle(&self, ii: &InstallsItem) -> Result<InstalledState, DetectionError> {
        let (Some(path), Some(wanted)) = (ii.path.as_deref(), ii.short_version.as_deref()) else {
            return Err(DetectionError::MissingBundleInfo);
        };
        let bundle = self.resolve(path);
        let Some(info_path) = bundle_info_plist(&bundle) else {
            debug!("No Info.plist found in {}", bundle.display());
            return Ok(InstalledState::Absent);
        };
        Ok(self.compare_plist_at(&info_path, wanted, ii.minimum_update_version.as_deref()))
    }

    fn compare_plist(&self, ii: &InstallsItem) -> Result<InstalledState, DetectionError> {
        let (Some(path), Some(wanted)) = (ii.path.as_deref(), ii.short_version.as_deref()) else {
            return Err(DetectionError::MissingPlistInfo);
        };
        let path = self.resolve(path);
        if !path.exists() {
            debug!("No plist found at {}", path.display());
            return Ok(InstalledState::Absent);
        }
        Ok(self.compare_plist_at(&path, wanted, ii.minimum_update_version.as_deref()))
    }

    fn compare_plist_at(&self, path: &Path, wanted: &str, minimum: Option<&str>) -> InstalledState {
        let Some(installed) = read_plist_dict(path).and_then(|d| version_string(&d)) else {
            debug!("No version info in {}", path.display());
            return InstalledState::Absent;
        };
        if let Some(minimum) = minimum {
            if compare_versions(&installed, minimum) == VersionComparison::Older {
                debug!("Version {} too old < {}", installed, minimum);
                return InstalledState::Absent;
            }
        }
        compare_versions(&installed, wanted).into()
    }

    /// Existence (and optional MD5) check for a plain filesystem item
    fn file_state(&self, ii: &InstallsItem) -> Result<InstalledState, DetectionError> {
        let path = ii.path.as_deref().ok_or(DetectionError::MissingPath)?;
        let path = self.resolve(path);
        if !self.path_exists(&path) {
            debug!("{} does not exist", path.display());
            return Ok(InstalledState::Absent);
        }
        let Some(expected) = ii.md5checksum.as_deref() else {
            return Ok(InstalledState::Same);
        };
        match fs::read(&path) {
            Ok(bytes) => {
                let actual = hex::encode(Md5::digest(&bytes));
                if actual.eq_ignore_ascii_case(expected) {
                    Ok(InstalledState::Same)
                } else {
                    debug!("Checksums differ: expected {}, got {}", expected, actual);
                    Ok(InstalledState::Older)
                }
            }
            Err(e) => {
                debug!("Could not read {}: {}", path.display(), e);
                Ok(InstalledState::Older)
            }
        }
    }

    /// Compare a receipt against the installed package database
    pub fn compare_receipt(&self, receipt: &Receipt) -> Result<InstalledState, DetectionError> {
        if receipt.packageid.is_empty() || receipt.version.is_empty() {
            return Err(DetectionError::MalformedReceipt);
        }
        match self.installed_packages.get(&receipt.packageid) {
            Some(installed) => Ok(compare_versions(installed, &receipt.version).into()),
            None => Ok(InstalledState::Absent),
        }
    }

    /// Existence check that does not follow symlinks
    fn path_exists(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).is_ok()
    }
}
