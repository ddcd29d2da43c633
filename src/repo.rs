// src/repo.rs

//! Catalog and manifest retrieval
//!
//! [`RepoSource`] is what the walker and orchestrator see. [`RemoteRepo`]
//! fetches documents from the software repository into the managed install
//! directory and parses them from there. A document that fails to parse is
//! deleted so the next run starts clean.

use crate::catalog::{ItemRecord, read_catalog};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetch::{FetchOptions, Fetcher};
use crate::manifest::{Manifest, read_manifest};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Source of catalogs and manifests
pub trait RepoSource {
    /// Items of the named catalog
    fn catalog(&self, name: &str) -> Result<Vec<ItemRecord>>;

    /// The named manifest
    fn manifest(&self, name: &str) -> Result<Manifest>;
}

/// Repository reached through a [`Fetcher`]
pub struct RemoteRepo<'a> {
    config: &'a Config,
    fetcher: &'a dyn Fetcher,
}

/// Percent-encode each segment of a repository-relative path
pub(crate) fn encode_path(name: &str) -> String {
    name.split('/')
        .map(|segment| url::form_urlencoded::byte_serialize(segment.as_bytes()).collect::<String>())
        .collect::<Vec<_>>()
        .join("/")
        .replace('+', "%20")
}

impl<'a> RemoteRepo<'a> {
    pub fn new(config: &'a Config, fetcher: &'a dyn Fetcher) -> Self {
        Self { config, fetcher }
    }

    /// Fetch `name` from `base_url` into `dir`, returning the local path
    ///
    /// A failed download falls back to a previously cached copy.
    fn fetch_document(&self, base_url: &str, dir: &Path, name: &str) -> Result<PathBuf> {
        let url = format!("{}/{}", base_url.trim_end_matches('/'), encode_path(name));
        let dest = dir.join(name);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        let options = FetchOptions {
            message: Some(format!("Retrieving {}", name)),
            ..Default::default()
        };
        match self.fetcher.fetch_if_changed(&url, &dest, &options) {
            Ok(changed) => {
                debug!("{} {}", name, if changed { "updated" } else { "unchanged" });
                Ok(dest)
            }
            Err(e) if dest.exists() => {
                warn!("Could not retrieve {}: {}; using cached copy", name, e);
                Ok(dest)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Remove a document that failed to parse
pub fn discard_malformed(path: &Path, err: &Error) {
    warn!("{}; removing it", err);
    if let Err(e) = fs::remove_file(path) {
        debug!("Could not remove {}: {}", path.display(), e);
    }
}

impl RepoSource for RemoteRepo<'_> {
    fn catalog(&self, name: &str) -> Result<Vec<ItemRecord>> {
        let path = self.fetch_document(
            &self.config.catalog_base_url(),
            &self.config.catalogs_dir(),
            name,
        )?;
        read_catalog(&path).inspect_err(|e| {
            if matches!(e, Error::MalformedDocument { .. }) {
                discard_malformed(&path, e);
            }
        })
    }

    fn manifest(&self, name: &str) -> Result<Manifest> {
        let path = self.fetch_document(
            &self.config.manifest_base_url(),
            &self.config.manifests_dir(),
            name,
        )?;
        read_manifest(&path).inspect_err(|e| {
            if matches!(e, Error::MalformedDocument { .. }) {
                discard_malformed(&path, e);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::HttpFetcher;

    fn repo_config(repo: &Path, managed: &Path) -> Config {
        Config {
            software_repo_url: format!("file://{}", repo.display()),
            managed_install_dir: managed.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn test_encode_path() {
        assert_eq!(encode_path("groups/Lab Macs"), "groups/Lab%20Macs");
        assert_eq!(encode_path("site_default"), "site_default");
    }

    #[test]
    fn test_fetch_manifest_and_discard_malformed_catalog() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("repo");
        let managed = tmp.path().join("managed");
        fs::create_dir_all(repo.join("manifests")).unwrap();
        fs::create_dir_all(repo.join("catalogs")).unwrap();

        let manifest = Manifest {
            catalogs: vec!["production".to_string()],
            managed_installs: vec!["Firefox".to_string()],
            ..Default::default()
        };
        plist::to_file_xml(repo.join("manifests/site_default"), &manifest).unwrap();
        fs::write(repo.join("catalogs/production"), b"not a plist").unwrap();

        let config = repo_config(&repo, &managed);
        let fetcher = HttpFetcher::new().unwrap();
        let source = RemoteRepo::new(&config, &fetcher);

        assert_eq!(source.manifest("site_default").unwrap(), manifest);
        assert!(managed.join("manifests/site_default").exists());

        let err = source.catalog("production").unwrap_err();
        assert!(matches!(err, Error::MalformedDocument { .. }));
        assert!(!managed.join("catalogs/production").exists());
    }

    #[test]
    fn test_missing_manifest_without_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let config = repo_config(&tmp.path().join("repo"), &tmp.path().join("managed"));
        let fetcher = HttpFetcher::new().unwrap();
        let source = RemoteRepo::new(&config, &fetcher);
        assert!(matches!(source.manifest("nope"), Err(Error::Download(_))));
    }
}
