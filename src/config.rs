// src/config.rs

//! Client configuration
//!
//! Loaded from a TOML file. Every key is optional; a missing file yields the
//! defaults.
//!
//! ```toml
//! managed_install_dir = "/Library/Managed Installs"
//! software_repo_url = "https://munki.example.com/repo"
//! client_identifier = "lab-machines"
//! force_install_warning_hours = 4
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/cairn/config.toml";

/// Client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Working directory holding the cache, catalogs, manifests and InstallInfo
    pub managed_install_dir: PathBuf,
    /// Base URL of the software repository
    pub software_repo_url: String,
    /// Overrides `<software_repo_url>/catalogs`
    pub catalog_url: Option<String>,
    /// Overrides `<software_repo_url>/manifests`
    pub manifest_url: Option<String>,
    /// Overrides `<software_repo_url>/pkgs`
    pub package_url: Option<String>,
    /// Primary manifest name; the hostname is tried when unset
    pub client_identifier: Option<String>,
    /// How far ahead a force-install deadline is reported as "soon"
    pub force_install_warning_hours: i64,
    /// Prefix applied to on-disk detection paths
    pub install_root: PathBuf,
    /// Overrides the detected OS version
    pub os_version: Option<String>,
    /// Overrides the detected machine model
    pub machine_model: Option<String>,
    /// Lock file serializing runs
    pub lock_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            managed_install_dir: PathBuf::from("/Library/Managed Installs"),
            software_repo_url: "http://munki/repo".to_string(),
            catalog_url: None,
            manifest_url: None,
            package_url: None,
            client_identifier: None,
            force_install_warning_hours: 4,
            install_root: PathBuf::from("/"),
            os_version: None,
            machine_model: None,
            lock_path: None,
        }
    }
}

fn join_url(base: &str, leaf: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), leaf)
}

impl Config {
    /// Load configuration from `path`, or the default location
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        if !path.exists() {
            debug!("No configuration at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        if config.software_repo_url.is_empty() {
            return Err(Error::Config("software_repo_url must not be empty".to_string()));
        }
        Ok(config)
    }

    pub fn catalog_base_url(&self) -> String {
        self.catalog_url
            .clone()
            .unwrap_or_else(|| join_url(&self.software_repo_url, "catalogs"))
    }

    pub fn manifest_base_url(&self) -> String {
        self.manifest_url
            .clone()
            .unwrap_or_else(|| join_url(&self.software_repo_url, "manifests"))
    }

    pub fn package_base_url(&self) -> String {
        self.package_url
            .clone()
            .unwrap_or_else(|| join_url(&self.software_repo_url, "pkgs"))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.managed_install_dir.join("Cache")
    }

    pub fn catalogs_dir(&self) -> PathBuf {
        self.managed_install_dir.join("catalogs")
    }

    pub fn manifests_dir(&self) -> PathBuf {
        self.managed_install_dir.join("manifests")
    }

    pub fn install_info_path(&self) -> PathBuf {
        self.managed_install_dir.join("InstallInfo.plist")
    }

    pub fn report_path(&self) -> PathBuf {
        self.managed_install_dir.join("ManagedInstallReport.plist")
    }

    pub fn conditions_path(&self) -> PathBuf {
        self.managed_install_dir.join("ConditionalItems.plist")
    }

    /// User-writable self-service choices
    pub fn self_serve_user_path(&self) -> PathBuf {
        self.managed_install_dir.join("SelfServeManifest")
    }

    /// Working copy of the self-service manifest
    pub fn self_serve_path(&self) -> PathBuf {
        self.manifests_dir().join("SelfServeManifest")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.lock_path
            .clone()
            .unwrap_or_else(|| self.managed_install_dir.join("cairn.lock"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_derived_urls() {
        let config = Config::parse("software_repo_url = \"https://repo.example.com/munki/\"").unwrap();
        assert_eq!(config.catalog_base_url(), "https://repo.example.com/munki/catalogs");
        assert_eq!(config.package_base_url(), "https://repo.example.com/munki/pkgs");
        assert_eq!(config.force_install_warning_hours, 4);
        assert!(config.install_info_path().ends_with("InstallInfo.plist"));
    }

    #[test]
    fn test_overrides() {
        let config = Config::parse(
            r#"
managed_install_dir = "/var/lib/cairn"
manifest_url = "https://manifests.example.com/"
client_identifier = "lab"
force_install_warning_hours = 12
"#,
        )
        .unwrap();
        assert_eq!(config.manifest_base_url(), "https://manifests.example.com/");
        assert_eq!(config.cache_dir(), PathBuf::from("/var/lib/cairn/Cache"));
        assert_eq!(config.client_identifier.as_deref(), Some("lab"));
        assert_eq!(config.force_install_warning_hours, 12);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&tmp.path().join("absent.toml"))).unwrap();
        assert_eq!(config.software_repo_url, "http://munki/repo");
    }

    #[test]
    fn test_invalid_config() {
        assert!(Config::parse("force_install_warning_hours = \"soon\"").is_err());
        assert!(Config::parse("software_repo_url = \"\"").is_err());
    }
}
