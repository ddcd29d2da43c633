// src/detect/receipts.rs

//! Installed package receipts
//!
//! The receipt database is a directory of plists, one per installed package,
//! each carrying `PackageIdentifier` and `PackageVersion`. [`PackageAnalysis`]
//! cross-references those receipts with catalog items to decide which item
//! names are installed and which package IDs each installed name owns.

use super::bundle::read_plist_dict;
use crate::catalog::CatalogSet;
use plist::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Default receipt database location, relative to the install root
pub const RECEIPTS_DIR: &str = "var/db/receipts";

/// Read every receipt under `dir` into packageid → version
pub fn read_receipt_database(dir: &Path) -> HashMap<String, String> {
    let mut installed = HashMap::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("No receipt database at {}: {}", dir.display(), e);
            return installed;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().is_none_or(|ext| ext != "plist") {
            continue;
        }
        let Some(dict) = read_plist_dict(&path) else {
            continue;
        };
        let id = dict.get("PackageIdentifier").and_then(Value::as_string);
        let version = dict.get("PackageVersion").and_then(Value::as_string);
        if let (Some(id), Some(version)) = (id, version) {
            installed.insert(id.to_string(), version.to_string());
        }
    }

    debug!("Read {} package receipts from {}", installed.len(), dir.display());
    installed
}

/// Cross-reference of catalog receipts against installed packages
#[derive(Debug, Clone, Default)]
pub struct PackageAnalysis {
    /// Item name → installed package IDs it declares
    pub receipts_for_name: HashMap<String, Vec<String>>,
    /// Item names considered installed
    pub installed_names: HashSet<String>,
    /// Package ID → installed item names referencing it
    pub pkg_references: HashMap<String, Vec<String>>,
}

impl PackageAnalysis {
    /// Analyze every loaded catalog against the installed package set
    pub fn analyze(catalogs: &CatalogSet, installed: &HashMap<String, String>) -> Self {
        // BTreeMap keeps the analysis deterministic regardless of catalog load order
        let mut pkgids_for_name: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for index in catalogs.all() {
            for item in index.items() {
                for receipt in &item.receipts {
                    if receipt.packageid.is_empty() {
                        continue;
                    }
                    let ids = pkgids_for_name.entry(item.name.clone()).or_default();
                    if !ids.contains(&receipt.packageid) {
                        ids.push(receipt.packageid.clone());
                    }
                }
            }
        }

        let mut receipts_for_name = HashMap::new();
        let mut fully_installed = Vec::new();
        let mut partial = Vec::new();
        for (name, ids) in &pkgids_for_name {
            let found: Vec<String> = ids.iter().filter(|id| installed.contains_key(*id)).cloned().collect();
            if found.is_empty() {
                continue;
            }
            if found.len() == ids.len() {
                fully_installed.push(name.clone());
            } else {
                partial.push(name.clone());
            }
            receipts_for_name.insert(name.clone(), found);
        }

        let mut installed_names: HashSet<String> = fully_installed.iter().cloned().collect();
        // A partially installed name counts only if it owns a package nobody else claims
        for name in &partial {
            let mut unique: HashSet<&String> = receipts_for_name[name].iter().collect();
            for other in fully_installed.iter().chain(partial.iter()) {
                if other == name {
                    continue;
                }
                for id in &receipts_for_name[other] {
                    unique.remove(id);
                }
            }
            if !unique.is_empty() {
                installed_names.insert(name.clone());
            }
        }

        let mut pkg_references: HashMap<String, Vec<String>> = HashMap::new();
        for (name, ids) in &receipts_for_name {
            if !installed_names.contains(name) {
                continue;
            }
            for id in ids {
                pkg_references.entry(id.clone()).or_default().push(name.clone());
            }
        }

        Self {
            receipts_for_name,
            installed_names,
            pkg_references,
        }
    }

    /// Drop `name`'s reference to each package, returning the ones now unreferenced
    pub fn release_packages(&mut self, name: &str, packages: &[String]) -> Vec<String> {
        let mut orphaned = Vec::new();
        for pkg in packages {
            match self.pkg_references.get_mut(pkg) {
                Some(refs) => {
                    refs.retain(|n| n != name);
                    if refs.is_empty() {
                        orphaned.push(pkg.clone());
                    }
                }
                None => debug!("Package {} missing from receipt references", pkg),
            }
        }
        orphaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ItemRecord, Receipt};

    fn with_receipts(name: &str, ids: &[&str]) -> ItemRecord {
        let mut item = ItemRecord::new(name, "1.0");
        for id in ids {
            item.receipts.push(Receipt {
                packageid: id.to_string(),
                version: "1.0".to_string(),
                installed_size: None,
            });
        }
        item
    }

    fn installed(ids: &[&str]) -> HashMap<String, String> {
        ids.iter().map(|id| (id.to_string(), "1.0".to_string())).collect()
    }

    #[test]
    fn test_read_receipt_database() {
        let tmp = tempfile::tempdir().unwrap();
        let mut dict = plist::Dictionary::new();
        dict.insert("PackageIdentifier".into(), Value::String("com.example.pkg".into()));
        dict.insert("PackageVersion".into(), Value::String("3.2".into()));
        Value::Dictionary(dict)
            .to_file_xml(tmp.path().join("com.example.pkg.plist"))
            .unwrap();
        fs::write(tmp.path().join("com.example.pkg.bom"), b"ignored").unwrap();

        let db = read_receipt_database(tmp.path());
        assert_eq!(db.get("com.example.pkg").map(String::as_str), Some("3.2"));
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn test_analysis_shared_and_partial_packages() {
        let mut catalogs = CatalogSet::new();
        catalogs.insert(
            "production",
            vec![
                with_receipts("Suite", &["com.x.core", "com.x.shared"]),
                with_receipts("Addon", &["com.x.shared", "com.x.addon"]),
                with_receipts("Ghost", &["com.x.shared", "com.x.missing"]),
            ],
        );
        let analysis = PackageAnalysis::analyze(
            &catalogs,
            &installed(&["com.x.core", "com.x.shared", "com.x.addon"]),
        );

        assert!(analysis.installed_names.contains("Suite"));
        assert!(analysis.installed_names.contains("Addon"));
        // Ghost only has the shared package, which other names also own
        assert!(!analysis.installed_names.contains("Ghost"));
        assert_eq!(analysis.pkg_references["com.x.shared"].len(), 2);
    }

    #[test]
    fn test_release_packages_only_orphans_last_reference() {
        let mut catalogs = CatalogSet::new();
        catalogs.insert(
            "production",
            vec![
                with_receipts("Suite", &["com.x.core", "com.x.shared"]),
                with_receipts("Addon", &["com.x.shared"]),
            ],
        );
        let mut analysis =
            PackageAnalysis::analyze(&catalogs, &installed(&["com.x.core", "com.x.shared"]));

        let suite_pkgs = analysis.receipts_for_name["Suite"].clone();
        let orphaned = analysis.release_packages("Suite", &suite_pkgs);
        assert_eq!(orphaned, vec!["com.x.core".to_string()]);

        let orphaned = analysis.release_packages("Addon", &["com.x.shared".to_string()]);
        assert_eq!(orphaned, vec!["com.x.shared".to_string()]);
    }
}
