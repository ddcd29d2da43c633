// src/version/mod.rs

//! Loose version ordering for catalog items
//!
//! Item versions are free-form strings ("10.6.8", "2.3b1", "11.0-beta2").
//! They are split into numeric and lexical components and compared
//! component by component, padding the shorter side with zeros so that
//! "10.6" and "10.6.0" compare equal.

use std::cmp::Ordering;
use std::fmt;

/// One component of a loose version
#[derive(Debug, Clone, PartialEq, Eq)]
enum Component {
    Number(u64),
    Text(String),
}

impl Ord for Component {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Component::Number(a), Component::Number(b)) => a.cmp(b),
            (Component::Text(a), Component::Text(b)) => a.cmp(b),
            // Numbers always sort before text
            (Component::Number(_), Component::Text(_)) => Ordering::Less,
            (Component::Text(_), Component::Number(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Component {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Digit,
    Lower,
    Other,
}

fn classify(c: char) -> CharClass {
    if c.is_ascii_digit() {
        CharClass::Digit
    } else if c.is_ascii_lowercase() {
        CharClass::Lower
    } else {
        CharClass::Other
    }
}

/// A parsed loose version string
#[derive(Debug, Clone)]
pub struct LooseVersion {
    original: String,
    components: Vec<Component>,
}

impl LooseVersion {
    /// Parse a version string. Never fails; an empty string has no components.
    pub fn parse(s: &str) -> Self {
        let mut components = Vec::new();
        let mut current = String::new();
        let mut current_class: Option<CharClass> = None;

        let mut flush = |buf: &mut String, class: Option<CharClass>| {
            if buf.is_empty() {
                return;
            }
            let component = match class {
                Some(CharClass::Digit) => match buf.parse::<u64>() {
                    Ok(n) => Component::Number(n),
                    // Absurdly long digit runs: strip leading zeros and compare as text
                    Err(_) => Component::Text(buf.trim_start_matches('0').to_string()),
                },
                _ => Component::Text(buf.clone()),
            };
            components.push(component);
            buf.clear();
        };

        for c in s.chars() {
            if c == '.' {
                flush(&mut current, current_class);
                current_class = None;
                continue;
            }
            let class = classify(c);
            if current_class != Some(class) {
                flush(&mut current, current_class);
                current_class = Some(class);
            }
            current.push(c);
        }
        flush(&mut current, current_class);

        Self {
            original: s.to_string(),
            components,
        }
    }

    /// The string this version was parsed from
    pub fn as_str(&self) -> &str {
        &self.original
    }

    fn padded(&self, len: usize) -> Vec<Component> {
        let mut padded = self.components.clone();
        while padded.len() < len {
            padded.push(Component::Number(0));
        }
        padded
    }
}

impl PartialEq for LooseVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for LooseVersion {}

impl Ord for LooseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        self.padded(len).cmp(&other.padded(len))
    }
}

impl PartialOrd for LooseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for LooseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original)
    }
}

/// Result of comparing an installed (or candidate) version against a reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionComparison {
    Older,
    Same,
    Newer,
}

/// Compare `this` against `that`
pub fn compare_versions(this: &str, that: &str) -> VersionComparison {
    match LooseVersion::parse(this).cmp(&LooseVersion::parse(that)) {
        Ordering::Less => VersionComparison::Older,
        Ordering::Equal => VersionComparison::Same,
        Ordering::Greater => VersionComparison::Newer,
    }
}

/// Trim trailing ".0" segments while more than two segments remain
///
/// - "10.0.0.0" → "10.0"
/// - "10.0.0.1" → "10.0.0.1"
/// - "10.0.0-abc1.0" → "10.0.0-abc1"
pub fn trim_version(version: &str) -> String {
    if version.is_empty() {
        return String::new();
    }
    let mut parts: Vec<&str> = version.split('.').collect();
    while parts.len() > 2 && parts.last() == Some(&"0") {
        parts.pop();
    }
    parts.join(".")
}

/// Split an item name with an embedded version into (name, version)
///
/// Both "Name--1.2.3" and "Name-1.2.3" forms are recognized; the double
/// hyphen is tried first. The version must start with a digit, otherwise
/// the whole string is returned as the name with an empty version.
pub fn split_name_version(s: &str) -> (String, String) {
    for delim in ["--", "-"] {
        if let Some(pos) = s.rfind(delim) {
            let version = &s[pos + delim.len()..];
            if version.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                return (s[..pos].to_string(), version.to_string());
            }
        }
    }
    (s.to_string(), String::new())
}

/// Strip an embedded version, returning just the item name
pub fn base_name(s: &str) -> String {
    split_name_version(s).0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_version() {
        assert_eq!(trim_version("10.0.0.0"), "10.0");
        assert_eq!(trim_version("10.0.0.1"), "10.0.0.1");
        assert_eq!(trim_version("10.0.0-abc1.0"), "10.0.0-abc1");
        assert_eq!(trim_version("10.0"), "10.0");
        assert_eq!(trim_version("1"), "1");
        assert_eq!(trim_version(""), "");
    }

    #[test]
    fn test_trim_version_idempotent() {
        for v in ["10.0.0.0", "10.0.0.1", "10.0.0-abc1.0", "3.0.0", "1.0.0.0.0.0", "2"] {
            let once = trim_version(v);
            assert_eq!(trim_version(&once), once);
        }
    }

    #[test]
    fn test_split_name_version() {
        assert_eq!(
            split_name_version("TextWrangler-2.3b1"),
            ("TextWrangler".to_string(), "2.3b1".to_string())
        );
        assert_eq!(
            split_name_version("AdobePhotoshopCS3--11.2.1"),
            ("AdobePhotoshopCS3".to_string(), "11.2.1".to_string())
        );
        assert_eq!(
            split_name_version("PlainName"),
            ("PlainName".to_string(), String::new())
        );
    }

    #[test]
    fn test_split_name_version_non_numeric_suffix() {
        assert_eq!(
            split_name_version("Microsoft-Office"),
            ("Microsoft-Office".to_string(), String::new())
        );
        assert_eq!(
            split_name_version("Some-Tool-1.0"),
            ("Some-Tool".to_string(), "1.0".to_string())
        );
    }

    #[test]
    fn test_compare_versions_padding() {
        assert_eq!(compare_versions("10.6", "10.6.0"), VersionComparison::Same);
        assert_eq!(compare_versions("10.6.1", "10.6"), VersionComparison::Newer);
        assert_eq!(compare_versions("1.9", "1.10"), VersionComparison::Older);
    }

    #[test]
    fn test_compare_versions_mixed_components() {
        assert_eq!(compare_versions("2.3b1", "2.3"), VersionComparison::Newer);
        assert_eq!(compare_versions("2.3b1", "2.3b2"), VersionComparison::Older);
        assert_eq!(compare_versions("2.3a1", "2.3b1"), VersionComparison::Older);
        assert_eq!(compare_versions("1.0", "1.0"), VersionComparison::Same);
    }

    #[test]
    fn test_loose_version_sorting() {
        let mut versions: Vec<LooseVersion> = ["1.10", "1.2", "1.9.1", "1.9"]
            .iter()
            .map(|v| LooseVersion::parse(v))
            .collect();
        versions.sort();
        let sorted: Vec<&str> = versions.iter().map(|v| v.as_str()).collect();
        assert_eq!(sorted, vec!["1.2", "1.9", "1.9.1", "1.10"]);
    }
}
