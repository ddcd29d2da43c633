// src/check/cache.rs

//! Local cache housekeeping after a run
//!
//! The payload cache is flat, keyed by installer item basename. Anything
//! the final plan no longer references is removed.

use crate::fetch::PARTIAL_SUFFIX;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Names of regular entries directly under `dir`
fn entries(dir: &Path) -> Vec<String> {
    let Ok(read) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = read
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    names.sort();
    names
}

fn remove(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) => {
            warn!("Could not remove {}: {}", path.display(), e);
            false
        }
    }
}

/// Remove cache entries not in `keep`
///
/// A partial download is removed when its completed file is present. Other
/// partials are kept while there are problem items, since they may be what
/// a failed download resumes from. Returns the names removed.
pub fn prune_cache(cache_dir: &Path, keep: &HashSet<String>, have_problem_items: bool) -> Vec<String> {
    let mut removed = Vec::new();
    for name in entries(cache_dir) {
        let path = cache_dir.join(&name);
        if let Some(complete) = name.strip_suffix(PARTIAL_SUFFIX) {
            if cache_dir.join(complete).exists() {
                debug!("Removing partial download {} next to complete copy", name);
            } else if have_problem_items {
                continue;
            }
        } else if keep.contains(&name) {
            continue;
        } else {
            info!("Removing {} from cache", name);
        }
        if remove(&path) {
            removed.push(name);
        }
    }
    removed
}

/// Remove cached catalogs that were not loaded this run
pub fn prune_catalogs<'a>(catalogs_dir: &Path, loaded: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let loaded: HashSet<&str> = loaded.into_iter().collect();
    let mut removed = Vec::new();
    for name in entries(catalogs_dir) {
        if loaded.contains(name.as_str()) {
            continue;
        }
        debug!("Removing unused catalog {}", name);
        if remove(&catalogs_dir.join(&name)) {
            removed.push(name);
        }
    }
    removed
}
