// src/catalog/index.rs

//! Lookup tables built from a catalog's flat item list

use super::item::ItemRecord;
use crate::version::trim_version;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Version buckets in first-seen order: (trimmed version, item indices)
type VersionBuckets = Vec<(String, Vec<usize>)>;

/// Index over one catalog
///
/// Built once from the catalog's items and never updated in place; reloading
/// a catalog rebuilds the whole index.
#[derive(Debug, Clone, Default)]
pub struct CatalogIndex {
    items: Vec<ItemRecord>,
    named: HashMap<String, VersionBuckets>,
    receipts: HashMap<String, VersionBuckets>,
    updaters: Vec<usize>,
    autoremove: Vec<String>,
}

fn push_bucket(buckets: &mut VersionBuckets, version: String, idx: usize) {
    match buckets.iter_mut().find(|(v, _)| *v == version) {
        Some((_, indices)) => indices.push(idx),
        None => buckets.push((version, vec![idx])),
    }
}

impl CatalogIndex {
    /// Build the index. Items without a name or version are skipped.
    pub fn build(items: Vec<ItemRecord>) -> Self {
        let mut index = Self::default();
        let mut autoremove_seen = HashSet::new();

        for item in items {
            if item.name.is_empty() {
                warn!("Catalog item is missing a name; skipping it");
                continue;
            }
            if item.version.is_empty() {
                warn!("Catalog item {} is missing a version; skipping it", item.name);
                continue;
            }

            let idx = index.items.len();
            push_bucket(
                index.named.entry(item.name.clone()).or_default(),
                trim_version(&item.version),
                idx,
            );
            for receipt in &item.receipts {
                if receipt.packageid.is_empty() || receipt.version.is_empty() {
                    continue;
                }
                push_bucket(
                    index.receipts.entry(receipt.packageid.clone()).or_default(),
                    trim_version(&receipt.version),
                    idx,
                );
            }
            if !item.update_for.is_empty() {
                index.updaters.push(idx);
            }
            if item.autoremove && autoremove_seen.insert(item.name.clone()) {
                index.autoremove.push(item.name.clone());
            }
            index.items.push(item);
        }

        index
    }

    /// All items, in catalog order
    pub fn items(&self) -> &[ItemRecord] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Version buckets for a name, in first-seen order
    pub fn versions_of(&self, name: &str) -> impl Iterator<Item = &str> {
        self.named
            .get(name)
            .into_iter()
            .flat_map(|buckets| buckets.iter().map(|(v, _)| v.as_str()))
    }

    /// Items with exactly this (trimmed) version
    pub fn items_with_version(&self, name: &str, version: &str) -> Vec<&ItemRecord> {
        let trimmed = trim_version(version);
        self.named
            .get(name)
            .and_then(|buckets| buckets.iter().find(|(v, _)| *v == trimmed))
            .map(|(_, indices)| indices.iter().map(|&i| &self.items[i]).collect())
            .unwrap_or_default()
    }

    /// Every item with this name, any version
    pub fn items_named(&self, name: &str) -> Vec<&ItemRecord> {
        self.named
            .get(name)
            .map(|buckets| {
                buckets
                    .iter()
                    .flat_map(|(_, indices)| indices.iter().map(|&i| &self.items[i]))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.named.contains_key(name)
    }

    /// Items whose receipts reference this package ID
    pub fn items_with_receipt(&self, packageid: &str) -> Vec<&ItemRecord> {
        self.receipts
            .get(packageid)
            .map(|buckets| {
                buckets
                    .iter()
                    .flat_map(|(_, indices)| indices.iter().map(|&i| &self.items[i]))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Updater items whose `update_for` contains `target` exactly
    pub fn find_updaters_for(&self, target: &str) -> Vec<&ItemRecord> {
        self.updaters
            .iter()
            .map(|&i| &self.items[i])
            .filter(|item| item.update_for.iter().any(|u| u == target))
            .collect()
    }

    /// Names flagged for automatic removal
    pub fn autoremove_names(&self) -> &[String] {
        &self.autoremove
    }
}
