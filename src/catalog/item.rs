// src/catalog/item.rs

//! Catalog item records (pkginfo) and their sub-structures
//!
//! Records are normalized once, at load time: list-valued keys accept a bare
//! string, deadlines are read as plist dates with the timezone discarded, and
//! uninstall methods are parsed into a typed enum. Resolver code never sees
//! the loose shapes found in hand-edited catalogs.

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A single installable unit from a catalog
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemRecord {
    pub name: String,
    pub version: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Names (optionally with embedded versions) that must be installed first
    #[serde(deserialize_with = "string_or_list", skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
    /// Names this item is an update for
    #[serde(deserialize_with = "string_or_list", skip_serializing_if = "Vec::is_empty")]
    pub update_for: Vec<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub installs: Vec<InstallsItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub receipts: Vec<Receipt>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub installer_item_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installer_item_hash: Option<String>,
    /// Payload size in KB
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installer_item_size: Option<u64>,
    /// Installed footprint in KB
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed_size: Option<u64>,
    #[serde(rename = "PackageCompleteURL", skip_serializing_if = "Option::is_none")]
    pub package_complete_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installer_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub uninstaller_item_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uninstaller_item_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uninstaller_item_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uninstall_method: Option<UninstallMethod>,
    pub uninstallable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uninstall_script: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items_to_copy: Vec<CopiedItem>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_os_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum_os_version: Option<String>,
    #[serde(deserialize_with = "string_or_list", skip_serializing_if = "Vec::is_empty")]
    pub supported_architectures: Vec<String>,

    #[serde(with = "wall_clock_date", skip_serializing_if = "Option::is_none")]
    pub force_install_after_date: Option<NaiveDateTime>,
    pub unattended_install: bool,
    pub unattended_uninstall: bool,
    pub forced_install: bool,
    pub forced_uninstall: bool,
    #[serde(rename = "RestartAction", skip_serializing_if = "Option::is_none")]
    pub restart_action: Option<RestartAction>,

    pub autoremove: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub softwareupdatename: Option<String>,
}

impl ItemRecord {
    /// Create a record with just a name and version
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    /// Name shown to users, falling back to the item name
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Whether the item declares a logout or restart requirement
    pub fn has_restart_action(&self) -> bool {
        self.restart_action
            .is_some_and(|action| action != RestartAction::None)
    }

    /// Basename of the installer payload, used as the cache key
    pub fn installer_item_basename(&self) -> Option<String> {
        self.installer_item_location.as_deref().map(location_basename)
    }
}

/// Basename of a repository-relative payload location
pub fn location_basename(location: &str) -> String {
    location
        .rsplit('/')
        .next()
        .unwrap_or(location)
        .to_string()
}

/// On-disk detection descriptor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallsItem {
    /// One of application, bundle, plist, file
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(rename = "CFBundleShortVersionString", skip_serializing_if = "Option::is_none")]
    pub short_version: Option<String>,
    #[serde(rename = "CFBundleIdentifier", skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
    #[serde(rename = "CFBundleName", skip_serializing_if = "Option::is_none")]
    pub bundle_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_update_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5checksum: Option<String>,
}

/// Installed package receipt reference
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Receipt {
    pub packageid: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed_size: Option<u64>,
}

/// A file copied into place by a copy-from-disk-image installer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CopiedItem {
    pub source_item: String,
    pub destination_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_item: Option<String>,
}

/// Logout/restart requirement declared by an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartAction {
    None,
    RequireLogout,
    RequireRestart,
    RecommendRestart,
}

/// How an installed item is removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UninstallMethod {
    /// Forget the item's package receipts and remove their files
    RemovePackages,
    /// Vendor uninstaller (any `Adobe*` method name)
    Vendor(String),
    RemoveCopiedItems,
    RemoveApp,
    /// Run the embedded `uninstall_script`
    UninstallScript,
    /// Run an executable already present on disk
    LocalScript(String),
}

impl UninstallMethod {
    pub fn as_str(&self) -> &str {
        match self {
            Self::RemovePackages => "removepackages",
            Self::Vendor(name) => name,
            Self::RemoveCopiedItems => "remove_copied_items",
            Self::RemoveApp => "remove_app",
            Self::UninstallScript => "uninstall_script",
            Self::LocalScript(path) => path,
        }
    }
}

impl From<String> for UninstallMethod {
    fn from(s: String) -> Self {
        match s.as_str() {
            "removepackages" => Self::RemovePackages,
            "remove_copied_items" => Self::RemoveCopiedItems,
            "remove_app" => Self::RemoveApp,
            "uninstall_script" => Self::UninstallScript,
            _ if s.starts_with("Adobe") => Self::Vendor(s),
            _ => Self::LocalScript(s),
        }
    }
}

impl fmt::Display for UninstallMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for UninstallMethod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for UninstallMethod {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

/// Accept either a bare string or a list of strings
pub fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// Plist dates read as wall-clock times
///
/// Deadlines are authored as local times but stored in UTC notation; the
/// offset is dropped so "2024-03-01T18:00:00Z" means 18:00 on the client.
pub mod wall_clock_date {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::SystemTime;

    pub fn serialize<S: Serializer>(
        value: &Option<NaiveDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(dt) => {
                let st: SystemTime = dt.and_utc().into();
                plist::Date::from(st).serialize(serializer)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        let date: Option<plist::Date> = Option::deserialize(deserializer)?;
        Ok(date.map(|d| {
            let st: SystemTime = d.into();
            DateTime::<Utc>::from(st).naive_utc()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PKGINFO: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>name</key><string>Firefox</string>
    <key>version</key><string>115.0</string>
    <key>update_for</key><string>FirefoxBase</string>
    <key>requires</key><array><string>Flash</string><string>Java-1.6</string></array>
    <key>uninstall_method</key><string>remove_app</string>
    <key>uninstallable</key><true/>
    <key>forced_uninstall</key><true/>
    <key>RestartAction</key><string>RequireLogout</string>
    <key>force_install_after_date</key><date>2024-03-01T18:00:00Z</date>
    <key>installer_item_size</key><integer>51200</integer>
    <key>installs</key>
    <array>
        <dict>
            <key>type</key><string>application</string>
            <key>path</key><string>/Applications/Firefox.app</string>
            <key>CFBundleShortVersionString</key><string>115.0</string>
        </dict>
    </array>
    <key>some_unknown_key</key><string>ignored</string>
</dict>
</plist>"#;

    #[test]
    fn test_parse_pkginfo_normalizes_shapes() {
        let item: ItemRecord = plist::from_bytes(PKGINFO.as_bytes()).unwrap();
        assert_eq!(item.name, "Firefox");
        assert_eq!(item.update_for, vec!["FirefoxBase".to_string()]);
        assert_eq!(item.requires.len(), 2);
        assert_eq!(item.uninstall_method, Some(UninstallMethod::RemoveApp));
        assert!(item.forced_uninstall);
        assert_eq!(item.restart_action, Some(RestartAction::RequireLogout));
        assert!(item.has_restart_action());
        assert_eq!(item.installer_item_size, Some(51200));
        assert_eq!(item.installs[0].kind, "application");
        assert_eq!(item.installs[0].short_version.as_deref(), Some("115.0"));

        let deadline = item.force_install_after_date.unwrap();
        assert_eq!(deadline.to_string(), "2024-03-01 18:00:00");
    }

    #[test]
    fn test_uninstall_method_parsing() {
        assert_eq!(
            UninstallMethod::from("AdobeUberUninstaller".to_string()),
            UninstallMethod::Vendor("AdobeUberUninstaller".to_string())
        );
        assert_eq!(
            UninstallMethod::from("/usr/local/bin/uninstall.sh".to_string()),
            UninstallMethod::LocalScript("/usr/local/bin/uninstall.sh".to_string())
        );
        assert_eq!(UninstallMethod::RemovePackages.to_string(), "removepackages");
    }

    #[test]
    fn test_installer_item_basename() {
        let mut item = ItemRecord::new("Foo", "1.0");
        assert_eq!(item.installer_item_basename(), None);
        item.installer_item_location = Some("apps/foo/Foo-1.0.dmg".to_string());
        assert_eq!(item.installer_item_basename().as_deref(), Some("Foo-1.0.dmg"));
    }

    #[test]
    fn test_restart_action_none_is_not_a_requirement() {
        let mut item = ItemRecord::new("Foo", "1.0");
        item.restart_action = Some(RestartAction::None);
        assert!(!item.has_restart_action());
    }
}
