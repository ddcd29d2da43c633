// src/catalog/selector.rs

//! Item selection across an ordered catalog list
//!
//! Chooses the best record for a requested name, honouring an embedded or
//! explicit version and filtering out items the machine cannot run.

use super::{CatalogSet, ItemRecord};
use crate::error::{Error, Result};
use crate::version::{LooseVersion, compare_versions, split_name_version, trim_version, VersionComparison};
use std::env;
use std::fmt;
use tracing::{debug, info};

/// Why a candidate was passed over
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub name: String,
    pub version: String,
    pub reason: String,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}: {}", self.name, self.version, self.reason)
    }
}

/// Selects catalog items eligible for this machine
#[derive(Debug, Clone)]
pub struct ItemSelector {
    os_version: String,
    arch: String,
}

impl ItemSelector {
    pub fn new(os_version: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os_version: os_version.into(),
            arch: arch.into(),
        }
    }

    /// Detect the current machine architecture in catalog naming
    pub fn detect_architecture() -> String {
        match env::consts::ARCH {
            "aarch64" => "arm64".to_string(),
            "x86" => "i386".to_string(),
            other => other.to_string(),
        }
    }

    pub fn os_version(&self) -> &str {
        &self.os_version
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    /// Check OS and architecture constraints, returning the reason on failure
    pub fn eligibility(&self, item: &ItemRecord) -> std::result::Result<(), String> {
        if let Some(min) = item.minimum_os_version.as_deref() {
            if compare_versions(&self.os_version, min) == VersionComparison::Older {
                return Err(format!(
                    "minimum_os_version is {}; this machine runs {}",
                    min, self.os_version
                ));
            }
        }
        if let Some(max) = item.maximum_os_version.as_deref() {
            if compare_versions(&self.os_version, max) != VersionComparison::Older {
                return Err(format!(
                    "maximum_os_version is {} (exclusive); this machine runs {}",
                    max, self.os_version
                ));
            }
        }
        if !item.supported_architectures.is_empty()
            && !item.supported_architectures.iter().any(|a| *a == self.arch)
        {
            return Err(format!(
                "supported_architectures are {}; this machine is {}",
                item.supported_architectures.join(", "),
                self.arch
            ));
        }
        Ok(())
    }

    /// Resolve a requested name to a single item record
    ///
    /// With no version (explicit or embedded) the newest eligible version is
    /// chosen; catalogs are searched in order and, within a catalog, versions
    /// are tried newest first.
    pub fn resolve(
        &self,
        catalogs: &CatalogSet,
        requested: &str,
        catalog_names: &[String],
        version: Option<&str>,
    ) -> Result<ItemRecord> {
        let (name, embedded) = split_name_version(requested);
        let wanted = match version.filter(|v| !v.is_empty()) {
            Some(v) => trim_version(v),
            None if !embedded.is_empty() => trim_version(&embedded),
            None => String::from("latest"),
        };

        debug!("Looking for {} version {}", name, wanted);

        let mut rejections: Vec<Rejection> = Vec::new();
        let mut found_any = false;

        for index in catalogs.ordered(catalog_names) {
            if !index.has_name(&name) {
                continue;
            }
            let candidates: Vec<&ItemRecord> = if wanted == "latest" {
                let mut versions: Vec<&str> = index.versions_of(&name).collect();
                versions.sort_by(|a, b| LooseVersion::parse(b).cmp(&LooseVersion::parse(a)));
                versions
                    .into_iter()
                    .flat_map(|v| index.items_with_version(&name, v))
                    .collect()
            } else {
                index.items_with_version(&name, &wanted)
            };

            for item in candidates {
                found_any = true;
                match self.eligibility(item) {
                    Ok(()) => {
                        info!("Found {} version {}", item.name, item.version);
                        return Ok(item.clone());
                    }
                    Err(reason) => {
                        debug!("{}-{}: {}", item.name, item.version, reason);
                        rejections.push(Rejection {
                            name: item.name.clone(),
                            version: item.version.clone(),
                            reason,
                        });
                    }
                }
            }
        }

        if !found_any {
            return Err(Error::NotFound(if wanted == "latest" {
                name
            } else {
                format!("{}-{}", name, wanted)
            }));
        }
        Err(Error::NoEligibleVersion {
            name,
            reasons: rejections
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_with(items: Vec<ItemRecord>) -> CatalogSet {
        let mut set = CatalogSet::new();
        set.insert("production", items);
        set
    }

    fn prod() -> Vec<String> {
        vec!["production".to_string()]
    }

    #[test]
    fn test_resolve_picks_latest() {
        let set = set_with(vec![ItemRecord::new("Foo", "1.0"), ItemRecord::new("Foo", "2.0")]);
        let selector = ItemSelector::new("10.15.7", "x86_64");
        let item = selector.resolve(&set, "Foo", &prod(), None).unwrap();
        assert_eq!(item.version, "2.0");
    }

    #[test]
    fn test_resolve_embedded_and_explicit_version() {
        let set = set_with(vec![ItemRecord::new("Foo", "1.0.0"), ItemRecord::new("Foo", "2.0")]);
        let selector = ItemSelector::new("10.15.7", "x86_64");
        assert_eq!(selector.resolve(&set, "Foo-1.0", &prod(), None).unwrap().version, "1.0.0");
        assert_eq!(selector.resolve(&set, "Foo", &prod(), Some("2.0")).unwrap().version, "2.0");
    }

    #[test]
    fn test_resolve_catalog_order_wins() {
        let mut set = CatalogSet::new();
        set.insert("testing", vec![ItemRecord::new("Foo", "1.5")]);
        set.insert("production", vec![ItemRecord::new("Foo", "2.0")]);
        let selector = ItemSelector::new("10.15.7", "x86_64");
        let order = vec!["testing".to_string(), "production".to_string()];
        assert_eq!(selector.resolve(&set, "Foo", &order, None).unwrap().version, "1.5");
    }

    #[test]
    fn test_resolve_skips_ineligible() {
        let mut newest = ItemRecord::new("Foo", "3.0");
        newest.minimum_os_version = Some("11.0".to_string());
        let mut arm_only = ItemRecord::new("Foo", "2.0");
        arm_only.supported_architectures = vec!["arm64".to_string()];
        let set = set_with(vec![ItemRecord::new("Foo", "1.0"), newest, arm_only]);

        let selector = ItemSelector::new("10.15.7", "x86_64");
        assert_eq!(selector.resolve(&set, "Foo", &prod(), None).unwrap().version, "1.0");
    }

    #[test]
    fn test_maximum_os_version_is_exclusive() {
        let selector = ItemSelector::new("10.6", "x86_64");
        let mut capped = ItemRecord::new("Legacy", "1.0");
        capped.minimum_os_version = Some("10.6".to_string());
        capped.maximum_os_version = Some("10.6".to_string());
        let reason = selector.eligibility(&capped).unwrap_err();
        assert_eq!(reason, "maximum_os_version is 10.6 (exclusive); this machine runs 10.6");

        capped.maximum_os_version = Some("10.6.1".to_string());
        assert!(selector.eligibility(&capped).is_ok());
    }

    #[test]
    fn test_resolve_errors() {
        let mut old_only = ItemRecord::new("Legacy", "1.0");
        old_only.maximum_os_version = Some("10.6".to_string());
        let set = set_with(vec![old_only]);
        let selector = ItemSelector::new("10.15.7", "x86_64");

        assert!(matches!(
            selector.resolve(&set, "Missing", &prod(), None),
            Err(Error::NotFound(_))
        ));
        match selector.resolve(&set, "Legacy", &prod(), None) {
            Err(Error::NoEligibleVersion { name, reasons }) => {
                assert_eq!(name, "Legacy");
                assert!(reasons.contains("maximum_os_version"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
