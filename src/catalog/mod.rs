// src/catalog/mod.rs

//! Catalogs of installable items
//!
//! A catalog is a plist array of item records. Each loaded catalog is
//! indexed once ([`CatalogIndex`]) and kept in a per-run [`CatalogSet`]
//! keyed by catalog name. Lookups always take an ordered list of catalog
//! names; earlier catalogs win ties.

mod index;
pub mod item;
mod selector;

pub use index::CatalogIndex;
pub use item::{
    CopiedItem, InstallsItem, ItemRecord, Receipt, RestartAction, UninstallMethod,
};
pub use selector::{ItemSelector, Rejection};

use crate::error::{Error, Result};
use crate::version::LooseVersion;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::debug;

/// Parse a catalog document into item records
pub fn parse_catalog(bytes: &[u8]) -> Result<Vec<ItemRecord>> {
    plist::from_bytes(bytes).map_err(|e| Error::MalformedDocument {
        path: String::from("<catalog>"),
        reason: e.to_string(),
    })
}

/// Read and parse a catalog file
pub fn read_catalog(path: &Path) -> Result<Vec<ItemRecord>> {
    let bytes = std::fs::read(path)?;
    parse_catalog(&bytes).map_err(|e| match e {
        Error::MalformedDocument { reason, .. } => Error::MalformedDocument {
            path: path.display().to_string(),
            reason,
        },
        other => other,
    })
}

/// All catalogs loaded during a run
#[derive(Debug, Default)]
pub struct CatalogSet {
    catalogs: HashMap<String, CatalogIndex>,
}

impl CatalogSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index and store a catalog, replacing any previous one with this name
    pub fn insert(&mut self, name: impl Into<String>, items: Vec<ItemRecord>) {
        let name = name.into();
        let index = CatalogIndex::build(items);
        debug!("Indexed catalog {} ({} items)", name, index.len());
        self.catalogs.insert(name, index);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.catalogs.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&CatalogIndex> {
        self.catalogs.get(name)
    }

    /// Names of every loaded catalog
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.catalogs.keys().map(String::as_str)
    }

    /// Indexes for the given names, in order, skipping ones not loaded
    pub fn ordered<'a>(&'a self, names: &'a [String]) -> impl Iterator<Item = &'a CatalogIndex> {
        names.iter().filter_map(|n| self.catalogs.get(n))
    }

    /// Every loaded catalog, in no particular order
    pub fn all(&self) -> impl Iterator<Item = &CatalogIndex> {
        self.catalogs.values()
    }

    /// Names of updater items targeting `target`, de-duplicated, in catalog order
    pub fn updaters_for(&self, target: &str, catalogs: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for index in self.ordered(catalogs) {
            for updater in index.find_updaters_for(target) {
                if seen.insert(updater.name.clone()) {
                    names.push(updater.name.clone());
                }
            }
        }
        names
    }

    /// Updaters targeting a specific build, via both composite name forms
    pub fn updaters_for_version(
        &self,
        name: &str,
        version: &str,
        catalogs: &[String],
    ) -> Vec<String> {
        let mut names = self.updaters_for(&format!("{}-{}", name, version), catalogs);
        for extra in self.updaters_for(&format!("{}--{}", name, version), catalogs) {
            if !names.contains(&extra) {
                names.push(extra);
            }
        }
        names
    }

    /// Every version of `name` across catalogs, without duplicates, newest first
    pub fn all_items_with_name(&self, name: &str, catalogs: &[String]) -> Vec<ItemRecord> {
        let mut found: Vec<ItemRecord> = Vec::new();
        for index in self.ordered(catalogs) {
            for item in index.items_named(name) {
                if !found.contains(item) {
                    found.push(item.clone());
                }
            }
        }
        found.sort_by(|a, b| LooseVersion::parse(&b.version).cmp(&LooseVersion::parse(&a.version)));
        found
    }

    /// Autoremove-flagged names across the given catalogs
    pub fn autoremove_names(&self, catalogs: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        self.ordered(catalogs)
            .flat_map(|index| index.autoremove_names().iter())
            .filter(|name| seen.insert((*name).clone()))
            .cloned()
            .collect()
    }
}
