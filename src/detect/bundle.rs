// src/detect/bundle.rs

//! Bundle and property-list version probing

use plist::{Dictionary, Value};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Read a plist file as a dictionary; unreadable or non-dictionary files yield None
pub fn read_plist_dict(path: &Path) -> Option<Dictionary> {
    match Value::from_file(path) {
        Ok(Value::Dictionary(dict)) => Some(dict),
        Ok(_) => {
            debug!("{} is not a dictionary plist", path.display());
            None
        }
        Err(e) => {
            debug!("{} may not be a plist: {}", path.display(), e);
            None
        }
    }
}

fn leading_version(raw: &str) -> Option<String> {
    let first = raw.split_whitespace().next()?;
    if first.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        Some(first.replace(',', "."))
    } else {
        None
    }
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(r) => Some(r.to_string()),
        _ => None,
    }
}

/// Extract a usable version string from a bundle's Info.plist
///
/// `CFBundleShortVersionString` wins when it starts with a digit, otherwise
/// `CFBundleVersion` is tried. Commas are read as periods.
pub fn version_string(dict: &Dictionary) -> Option<String> {
    let short = dict
        .get("Bundle versions string, short")
        .or_else(|| dict.get("CFBundleShortVersionString"))
        .and_then(value_as_text);
    if let Some(version) = short.as_deref().and_then(leading_version) {
        return Some(version);
    }
    dict.get("CFBundleVersion")
        .and_then(value_as_text)
        .as_deref()
        .and_then(leading_version)
}

/// Locate a bundle's Info.plist
pub fn bundle_info_plist(bundle: &Path) -> Option<PathBuf> {
    [bundle.join("Contents/Info.plist"), bundle.join("Resources/Info.plist")]
        .into_iter()
        .find(|p| p.exists())
}

/// An application bundle found on disk
#[derive(Debug, Clone, PartialEq)]
pub struct AppInfo {
    pub path: PathBuf,
    pub name: String,
    pub bundle_id: Option<String>,
    pub version: Option<String>,
}

/// Scan a directory tree for `.app` bundles
pub fn scan_applications(dir: &Path) -> Vec<AppInfo> {
    let mut apps = Vec::new();
    if !dir.is_dir() {
        return apps;
    }

    let mut walker = WalkDir::new(dir).max_depth(4).into_iter();
    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        if !entry.file_type().is_dir() || entry.path().extension().is_none_or(|ext| ext != "app")
        {
            continue;
        }
        // Don't descend into the bundle itself
        walker.skip_current_dir();

        let Some(info) = bundle_info_plist(entry.path()).and_then(|p| read_plist_dict(&p)) else {
            continue;
        };
        let name = info
            .get("CFBundleName")
            .and_then(Value::as_string)
            .map(str::to_string)
            .or_else(|| {
                entry
                    .path()
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
            })
            .unwrap_or_default();
        apps.push(AppInfo {
            path: entry.path().to_path_buf(),
            name,
            bundle_id: info
                .get("CFBundleIdentifier")
                .and_then(Value::as_string)
                .map(str::to_string),
            version: version_string(&info),
        });
    }

    debug!("Found {} applications under {}", apps.len(), dir.display());
    apps
}
