// src/facts.rs

//! Machine facts for item eligibility and conditional manifests
//!
//! [`MachineFacts`] is discovered once per run. [`Facts`] is the typed
//! environment that conditional-item predicates are evaluated against: the
//! machine facts plus derived OS version components, the current catalog
//! list, and admin-provided conditions.

use crate::catalog::ItemSelector;
use crate::config::Config;
use crate::detect::bundle::read_plist_dict;
use plist::Value;
use std::collections::BTreeMap;
use std::fs;
use std::net::UdpSocket;
use std::path::Path;
use tracing::{debug, warn};

/// Facts discovered about the running machine
#[derive(Debug, Clone, PartialEq)]
pub struct MachineFacts {
    pub hostname: String,
    pub arch: String,
    pub os_version: String,
    pub machine_model: String,
    pub ipv4_addresses: Vec<String>,
}

impl MachineFacts {
    /// Discover facts, honouring configuration overrides
    pub fn discover(config: &Config) -> Self {
        let root = &config.install_root;
        let os_version = config
            .os_version
            .clone()
            .or_else(|| product_version(root))
            .unwrap_or_else(|| "0".to_string());
        let machine_model = config
            .machine_model
            .clone()
            .or_else(|| read_trimmed(&root.join("sys/devices/virtual/dmi/id/product_name")))
            .unwrap_or_else(|| "unknown".to_string());
        let facts = Self {
            hostname: hostname(),
            arch: ItemSelector::detect_architecture(),
            os_version,
            machine_model,
            ipv4_addresses: primary_ipv4().into_iter().collect(),
        };
        debug!("Machine facts: {:?}", facts);
        facts
    }

    /// Hostname without its domain
    pub fn short_hostname(&self) -> &str {
        self.hostname.split('.').next().unwrap_or(&self.hostname)
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// OS product version from SystemVersion.plist, falling back to os-release
fn product_version(root: &Path) -> Option<String> {
    let system_version = root.join("System/Library/CoreServices/SystemVersion.plist");
    if let Some(version) = read_plist_dict(&system_version)
        .and_then(|d| d.get("ProductVersion").and_then(Value::as_string).map(str::to_string))
    {
        return Some(version);
    }
    let os_release = fs::read_to_string(root.join("etc/os-release")).ok()?;
    os_release.lines().find_map(|line| {
        line.strip_prefix("VERSION_ID=")
            .map(|v| v.trim_matches('"').to_string())
    })
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| read_trimmed(Path::new("/etc/hostname")))
        .unwrap_or_else(|| "localhost".to_string())
}

/// Address of the interface holding the default route; no packets are sent
fn primary_ipv4() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("192.0.2.1:9").ok()?;
    let addr = socket.local_addr().ok()?;
    Some(addr.ip().to_string())
}

/// A value a predicate can compare against
#[derive(Debug, Clone, PartialEq)]
pub enum FactValue {
    Str(String),
    Num(f64),
    Bool(bool),
    List(Vec<FactValue>),
}

impl FactValue {
    /// Convert a plist value; dictionaries and data are not representable
    pub fn from_plist(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::Str(s.clone())),
            Value::Boolean(b) => Some(Self::Bool(*b)),
            Value::Integer(i) => i.as_signed().map(|n| Self::Num(n as f64)),
            Value::Real(r) => Some(Self::Num(*r)),
            Value::Date(d) => Some(Self::Str(d.to_xml_format())),
            Value::Array(items) => Some(Self::List(
                items.iter().filter_map(Self::from_plist).collect(),
            )),
            _ => None,
        }
    }
}

impl From<&str> for FactValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

fn string_list(values: &[String]) -> FactValue {
    FactValue::List(values.iter().map(|v| FactValue::Str(v.clone())).collect())
}

/// Evaluation environment for conditional-item predicates
#[derive(Debug, Clone, PartialEq)]
pub struct Facts {
    pub hostname: String,
    pub arch: String,
    pub os_vers: String,
    pub os_vers_major: i64,
    pub os_vers_minor: i64,
    pub os_vers_patch: i64,
    pub machine_model: String,
    pub machine_type: String,
    pub munki_version: String,
    pub ipv4_address: Vec<String>,
    pub catalogs: Vec<String>,
    pub conditions: BTreeMap<String, FactValue>,
}

impl Facts {
    pub fn new(machine: &MachineFacts) -> Self {
        let mut parts = machine
            .os_version
            .split('.')
            .chain(["0", "0"])
            .map(|p| p.parse::<i64>().unwrap_or(0));
        let (major, minor, patch) = (
            parts.next().unwrap_or(0),
            parts.next().unwrap_or(0),
            parts.next().unwrap_or(0),
        );
        let machine_type = if machine.machine_model.contains("Book") {
            "laptop"
        } else {
            "desktop"
        };

        Self {
            hostname: machine.hostname.clone(),
            arch: machine.arch.clone(),
            os_vers: machine.os_version.clone(),
            os_vers_major: major,
            os_vers_minor: minor,
            os_vers_patch: patch,
            machine_model: machine.machine_model.clone(),
            machine_type: machine_type.to_string(),
            munki_version: env!("CARGO_PKG_VERSION").to_string(),
            ipv4_address: machine.ipv4_addresses.clone(),
            catalogs: Vec::new(),
            conditions: BTreeMap::new(),
        }
    }

    /// Same facts with a different catalog list
    pub fn with_catalogs(&self, catalogs: &[String]) -> Self {
        Self {
            catalogs: catalogs.to_vec(),
            ..self.clone()
        }
    }

    /// Load admin-provided conditions from a plist dictionary file
    ///
    /// Built-in fact names can't be overridden by conditions.
    pub fn load_conditions(&mut self, path: &Path) {
        if !path.exists() {
            return;
        }
        let Some(dict) = read_plist_dict(path) else {
            warn!("Could not read conditions from {}", path.display());
            return;
        };
        for (key, value) in dict.iter() {
            if let Some(v) = FactValue::from_plist(value) {
                self.conditions.insert(key.clone(), v);
            }
        }
        debug!("Loaded {} conditions", self.conditions.len());
    }

    /// Look up a fact by the name predicates use
    pub fn lookup(&self, key: &str) -> Option<FactValue> {
        let value = match key {
            "hostname" => FactValue::Str(self.hostname.clone()),
            "arch" => FactValue::Str(self.arch.clone()),
            "os_vers" => FactValue::Str(self.os_vers.clone()),
            "os_vers_major" => FactValue::Num(self.os_vers_major as f64),
            "os_vers_minor" => FactValue::Num(self.os_vers_minor as f64),
            "os_vers_patch" => FactValue::Num(self.os_vers_patch as f64),
            "machine_model" => FactValue::Str(self.machine_model.clone()),
            "machine_type" => FactValue::Str(self.machine_type.clone()),
            "munki_version" => FactValue::Str(self.munki_version.clone()),
            "ipv4_address" => string_list(&self.ipv4_address),
            "catalogs" => string_list(&self.catalogs),
            other => return self.conditions.get(other).cloned(),
        };
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(os: &str, model: &str) -> MachineFacts {
        MachineFacts {
            hostname: "lab-01.example.com".to_string(),
            arch: "x86_64".to_string(),
            os_version: os.to_string(),
            machine_model: model.to_string(),
            ipv4_addresses: vec!["10.0.0.5".to_string()],
        }
    }

    #[test]
    fn test_os_version_components() {
        let facts = Facts::new(&machine("10.15", "iMac20,1"));
        assert_eq!(
            (facts.os_vers_major, facts.os_vers_minor, facts.os_vers_patch),
            (10, 15, 0)
        );
        assert_eq!(facts.machine_type, "desktop");
    }

    #[test]
    fn test_machine_type_laptop() {
        let facts = Facts::new(&machine("13.4.1", "MacBookPro18,3"));
        assert_eq!(facts.machine_type, "laptop");
        assert_eq!(facts.os_vers_patch, 1);
    }

    #[test]
    fn test_lookup_and_conditions() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ConditionalItems.plist");
        let mut dict = plist::Dictionary::new();
        dict.insert("department".into(), Value::String("science".into()));
        dict.insert("has_printer".into(), Value::Boolean(true));
        Value::Dictionary(dict).to_file_xml(&path).unwrap();

        let mut facts = Facts::new(&machine("12.0", "Macmini9,1"))
            .with_catalogs(&["production".to_string()]);
        facts.load_conditions(&path);

        assert_eq!(facts.lookup("department"), Some(FactValue::from("science")));
        assert_eq!(facts.lookup("has_printer"), Some(FactValue::Bool(true)));
        assert_eq!(
            facts.lookup("catalogs"),
            Some(FactValue::List(vec![FactValue::from("production")]))
        );
        assert_eq!(facts.lookup("nonexistent"), None);
    }

    #[test]
    fn test_short_hostname() {
        assert_eq!(machine("1", "x").short_hostname(), "lab-01");
    }
}
