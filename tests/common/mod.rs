// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use cairn::catalog::{ItemRecord, Receipt, UninstallMethod};
use cairn::detect::{InstalledStateDetector, NoVendorUpdates, RECEIPTS_DIR};
use cairn::facts::MachineFacts;
use cairn::fetch::{FetchError, FetchOptions, Fetcher};
use cairn::manifest::Manifest;
use cairn::repo::RepoSource;
use cairn::resolver::DiskSpace;
use cairn::{CancellationToken, Config, Error, ItemSelector, Resolver};
use plist::{Dictionary, Value};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Catalogs and manifests served from memory
#[derive(Default)]
pub struct MemoryRepo {
    pub catalogs: HashMap<String, Vec<ItemRecord>>,
    pub manifests: HashMap<String, Manifest>,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(mut self, name: &str, items: Vec<ItemRecord>) -> Self {
        self.catalogs.insert(name.to_string(), items);
        self
    }

    pub fn with_manifest(mut self, name: &str, manifest: Manifest) -> Self {
        self.manifests.insert(name.to_string(), manifest);
        self
    }
}

impl RepoSource for MemoryRepo {
    fn catalog(&self, name: &str) -> cairn::Result<Vec<ItemRecord>> {
        self.catalogs
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    fn manifest(&self, name: &str) -> cairn::Result<Manifest> {
        self.manifests
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }
}

/// Fetcher that writes a small payload, or fails for chosen basenames
#[derive(Default)]
pub struct FakeFetcher {
    pub unreachable: HashSet<String>,
    pub corrupt: HashSet<String>,
    pub requested: RefCell<Vec<String>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable(mut self, basename: &str) -> Self {
        self.unreachable.insert(basename.to_string());
        self
    }

    pub fn corrupt(mut self, basename: &str) -> Self {
        self.corrupt.insert(basename.to_string());
        self
    }
}

impl Fetcher for FakeFetcher {
    fn fetch_if_changed(
        &self,
        url: &str,
        dest: &Path,
        _options: &FetchOptions,
    ) -> Result<bool, FetchError> {
        self.requested.borrow_mut().push(url.to_string());
        let basename = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.unreachable.contains(&basename) {
            return Err(FetchError::Download {
                url: url.to_string(),
                reason: "HTTP 404".to_string(),
            });
        }
        if self.corrupt.contains(&basename) {
            return Err(FetchError::Verification {
                path: dest.display().to_string(),
                expected: "abc".to_string(),
                actual: "def".to_string(),
            });
        }
        if dest.exists() {
            return Ok(false);
        }
        fs::create_dir_all(dest.parent().unwrap())?;
        fs::write(dest, b"payload")?;
        Ok(true)
    }
}

/// Reports a fixed amount of free space
pub struct FixedDiskSpace(pub u64);

impl DiskSpace for FixedDiskSpace {
    fn available_kbytes(&self) -> u64 {
        self.0
    }
}

/// A managed install directory and install root inside a TempDir
pub struct Fixture {
    pub dir: TempDir,
    pub config: Config,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = Config {
            managed_install_dir: dir.path().join("managed"),
            install_root: dir.path().join("root"),
            software_repo_url: "https://repo.example.com/munki".to_string(),
            ..Default::default()
        };
        fs::create_dir_all(&config.managed_install_dir).unwrap();
        fs::create_dir_all(&config.install_root).unwrap();
        Self { dir, config }
    }

    pub fn root(&self) -> PathBuf {
        self.config.install_root.clone()
    }

    /// Record an installed package in the receipt database
    pub fn add_receipt(&self, packageid: &str, version: &str) {
        let dir = self.root().join(RECEIPTS_DIR);
        fs::create_dir_all(&dir).unwrap();
        let mut dict = Dictionary::new();
        dict.insert("PackageIdentifier".into(), Value::String(packageid.into()));
        dict.insert("PackageVersion".into(), Value::String(version.into()));
        Value::Dictionary(dict)
            .to_file_xml(dir.join(format!("{}.plist", packageid)))
            .unwrap();
    }

    /// Place an application bundle under /Applications
    pub fn add_app(&self, name: &str, version: &str) {
        let contents = self
            .root()
            .join("Applications")
            .join(format!("{}.app", name))
            .join("Contents");
        fs::create_dir_all(&contents).unwrap();
        let mut dict = Dictionary::new();
        dict.insert("CFBundleName".into(), Value::String(name.into()));
        dict.insert("CFBundleShortVersionString".into(), Value::String(version.into()));
        Value::Dictionary(dict)
            .to_file_xml(contents.join("Info.plist"))
            .unwrap();
    }

    /// A resolver over this fixture's install root
    pub fn resolver<'a>(&'a self, fetcher: &'a dyn Fetcher, disk: &'a dyn DiskSpace) -> Resolver<'a> {
        let detector = InstalledStateDetector::from_system(self.root(), &NoVendorUpdates);
        Resolver::new(
            &self.config,
            ItemSelector::new("13.4", "arm64"),
            detector,
            fetcher,
            disk,
            CancellationToken::new(),
        )
    }

    pub fn cache_file(&self, basename: &str) -> PathBuf {
        self.config.cache_dir().join(basename)
    }
}

pub fn machine() -> MachineFacts {
    MachineFacts {
        hostname: "lab-01.example.com".to_string(),
        arch: "arm64".to_string(),
        os_version: "13.4".to_string(),
        machine_model: "Macmini9,1".to_string(),
        ipv4_addresses: vec!["10.0.0.5".to_string()],
    }
}

pub fn catalogs(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// An item with no detection info, assumed present
pub fn present(name: &str, version: &str) -> ItemRecord {
    ItemRecord::new(name, version)
}

/// An item detected by a package receipt, with an installer payload
pub fn package(name: &str, version: &str) -> ItemRecord {
    let mut item = ItemRecord::new(name, version);
    item.receipts.push(Receipt {
        packageid: format!("com.example.{}", name.to_lowercase()),
        version: version.to_string(),
        installed_size: None,
    });
    item.installer_item_location = Some(format!("apps/{}-{}.pkg", name, version));
    item.installer_item_size = Some(1024);
    item.installed_size = Some(2048);
    item
}

/// A receipt-detected item that can be removed by forgetting its packages
pub fn removable(name: &str, version: &str) -> ItemRecord {
    let mut item = package(name, version);
    item.uninstallable = true;
    item.uninstall_method = Some(UninstallMethod::RemovePackages);
    item
}

pub fn receipt_id(name: &str) -> String {
    format!("com.example.{}", name.to_lowercase())
}

pub fn manifest(catalog_names: &[&str]) -> Manifest {
    Manifest {
        catalogs: catalogs(catalog_names),
        ..Default::default()
    }
}

pub fn names(list: impl IntoIterator<Item = impl AsRef<str>>) -> Vec<String> {
    list.into_iter().map(|s| s.as_ref().to_string()).collect()
}
