// src/manifest/mod.rs

//! Manifests
//!
//! A manifest names the catalogs a machine draws from and four lists of item
//! names. Manifests nest through `included_manifests` and through
//! `conditional_items`, whose bodies apply only when their predicate holds
//! against the machine's [`Facts`](crate::facts::Facts).

pub mod predicate;
pub mod walker;

pub use walker::ManifestWalker;

use crate::catalog::item::string_or_list;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// A manifest document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    #[serde(deserialize_with = "string_or_list", skip_serializing_if = "Vec::is_empty")]
    pub catalogs: Vec<String>,
    #[serde(deserialize_with = "string_or_list", skip_serializing_if = "Vec::is_empty")]
    pub included_manifests: Vec<String>,
    #[serde(deserialize_with = "string_or_list")]
    pub managed_installs: Vec<String>,
    #[serde(deserialize_with = "string_or_list")]
    pub managed_uninstalls: Vec<String>,
    #[serde(deserialize_with = "string_or_list", skip_serializing_if = "Vec::is_empty")]
    pub managed_updates: Vec<String>,
    #[serde(deserialize_with = "string_or_list", skip_serializing_if = "Vec::is_empty")]
    pub optional_installs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditional_items: Vec<ConditionalItem>,
}

/// A manifest fragment gated by a predicate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionalItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(deserialize_with = "string_or_list", skip_serializing_if = "Vec::is_empty")]
    pub included_manifests: Vec<String>,
    #[serde(deserialize_with = "string_or_list", skip_serializing_if = "Vec::is_empty")]
    pub managed_installs: Vec<String>,
    #[serde(deserialize_with = "string_or_list", skip_serializing_if = "Vec::is_empty")]
    pub managed_uninstalls: Vec<String>,
    #[serde(deserialize_with = "string_or_list", skip_serializing_if = "Vec::is_empty")]
    pub managed_updates: Vec<String>,
    #[serde(deserialize_with = "string_or_list", skip_serializing_if = "Vec::is_empty")]
    pub optional_installs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditional_items: Vec<ConditionalItem>,
}

impl ConditionalItem {
    /// The body as an inline manifest; catalogs are always inherited
    pub fn body(&self) -> Manifest {
        Manifest {
            catalogs: Vec::new(),
            included_manifests: self.included_manifests.clone(),
            managed_installs: self.managed_installs.clone(),
            managed_uninstalls: self.managed_uninstalls.clone(),
            managed_updates: self.managed_updates.clone(),
            optional_installs: self.optional_installs.clone(),
            conditional_items: self.conditional_items.clone(),
        }
    }
}

/// The four list keys a manifest walk can process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManifestKey {
    ManagedInstalls,
    ManagedUninstalls,
    ManagedUpdates,
    OptionalInstalls,
}

impl ManifestKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ManagedInstalls => "managed_installs",
            Self::ManagedUninstalls => "managed_uninstalls",
            Self::ManagedUpdates => "managed_updates",
            Self::OptionalInstalls => "optional_installs",
        }
    }
}

impl fmt::Display for ManifestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Manifest {
    /// Names listed under `key`
    pub fn items(&self, key: ManifestKey) -> &[String] {
        match key {
            ManifestKey::ManagedInstalls => &self.managed_installs,
            ManifestKey::ManagedUninstalls => &self.managed_uninstalls,
            ManifestKey::ManagedUpdates => &self.managed_updates,
            ManifestKey::OptionalInstalls => &self.optional_installs,
        }
    }
}

/// Parse a manifest document
pub fn parse_manifest(bytes: &[u8]) -> Result<Manifest> {
    plist::from_bytes(bytes).map_err(|e| Error::MalformedDocument {
        path: String::from("<manifest>"),
        reason: e.to_string(),
    })
}

/// Read and parse a manifest file
pub fn read_manifest(path: &Path) -> Result<Manifest> {
    let bytes = std::fs::read(path)?;
    parse_manifest(&bytes).map_err(|e| match e {
        Error::MalformedDocument { reason, .. } => Error::MalformedDocument {
            path: path.display().to_string(),
            reason,
        },
        other => other,
    })
}

/// Write a manifest as an XML plist
pub fn write_manifest(path: &Path, manifest: &Manifest) -> Result<()> {
    plist::to_file_xml(path, manifest)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITE_DEFAULT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>catalogs</key>
    <array><string>testing</string><string>production</string></array>
    <key>included_manifests</key>
    <string>groups/lab</string>
    <key>managed_installs</key>
    <array><string>Firefox</string><string>TextWrangler-2.3b1</string></array>
    <key>conditional_items</key>
    <array>
        <dict>
            <key>condition</key>
            <string>machine_type == "laptop"</string>
            <key>managed_installs</key>
            <array><string>VPNClient</string></array>
        </dict>
    </array>
    <key>unknown_key</key>
    <integer>7</integer>
</dict>
</plist>"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = parse_manifest(SITE_DEFAULT.as_bytes()).unwrap();
        assert_eq!(manifest.catalogs, vec!["testing", "production"]);
        assert_eq!(manifest.included_manifests, vec!["groups/lab"]);
        assert_eq!(
            manifest.items(ManifestKey::ManagedInstalls),
            ["Firefox", "TextWrangler-2.3b1"]
        );
        assert!(manifest.items(ManifestKey::ManagedUninstalls).is_empty());

        let conditional = &manifest.conditional_items[0];
        assert_eq!(conditional.condition.as_deref(), Some("machine_type == \"laptop\""));
        let body = conditional.body();
        assert_eq!(body.managed_installs, vec!["VPNClient"]);
        assert!(body.catalogs.is_empty());
    }

    #[test]
    fn test_malformed_manifest() {
        let err = parse_manifest(b"<plist><dict><key>catalogs</key>").unwrap_err();
        assert!(matches!(err, Error::MalformedDocument { .. }));
    }

    #[test]
    fn test_write_and_read_back_self_serve() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("SelfServeManifest");
        let manifest = Manifest {
            managed_installs: vec!["Slack".to_string()],
            managed_uninstalls: vec!["Zoom".to_string()],
            ..Default::default()
        };
        write_manifest(&path, &manifest).unwrap();
        assert_eq!(read_manifest(&path).unwrap(), manifest);
    }
}
