// src/fetch.rs

//! Resource retrieval
//!
//! The resolver only sees the [`Fetcher`] trait: fetch a URL to a local path
//! if its content changed, optionally resuming a partial download and
//! verifying a SHA-256 digest. [`HttpFetcher`] implements it over reqwest for
//! `http(s)://` and by plain copy for `file://` URLs.
//!
//! # Partial downloads
//!
//! Data is streamed into `<dest>.download` and renamed into place only after
//! verification, so an interrupted run leaves a resumable partial file next
//! to the cache entry.

use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;
use reqwest::header::{HeaderName, HeaderValue, RANGE};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests
const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Buffer size for streaming downloads (8 KB)
const STREAM_BUFFER_SIZE: usize = 8192;

/// Suffix of in-progress downloads
pub const PARTIAL_SUFFIX: &str = ".download";

/// Errors from the fetch collaborator
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{url}: {reason}")]
    Download { url: String, reason: String },

    #[error("{path}: expected SHA-256 {expected}, got {actual}")]
    Verification {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<FetchError> for crate::Error {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Verification { .. } => crate::Error::Integrity(e.to_string()),
            FetchError::Download { .. } => crate::Error::Download(e.to_string()),
            FetchError::Io(io) => crate::Error::Io(io),
        }
    }
}

/// Options for a single fetch
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Continue an existing partial download
    pub resume: bool,
    /// Expected SHA-256 of the content, hex encoded
    pub expected_hash: Option<String>,
    /// Check `expected_hash` after downloading
    pub verify: bool,
    /// Extra request headers, "Name: value"
    pub headers: Vec<String>,
    /// Label for progress display
    pub message: Option<String>,
}

/// Fetch collaborator
pub trait Fetcher {
    /// Fetch `url` into `dest`, returning whether `dest` changed
    fn fetch_if_changed(&self, url: &str, dest: &Path, options: &FetchOptions)
        -> Result<bool, FetchError>;
}

/// Path of the partial file for a destination
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// SHA-256 of a file, hex encoded
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; STREAM_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn files_identical(a: &Path, b: &Path) -> bool {
    match (fs::read(a), fs::read(b)) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}

/// reqwest-backed fetcher
pub struct HttpFetcher {
    client: Client,
    show_progress: bool,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| FetchError::Download {
                url: String::new(),
                reason: format!("Failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            show_progress: false,
        })
    }

    /// Show a progress bar for downloads with a known size
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    fn progress_bar(&self, total: u64, label: &str) -> ProgressBar {
        if !self.show_progress || total == 0 {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.set_message(label.to_string());
        pb
    }

    /// Download over HTTP into `partial`, resuming when allowed
    fn download_http(
        &self,
        url: &str,
        partial: &Path,
        options: &FetchOptions,
    ) -> Result<(), FetchError> {
        let download_err = |reason: String| FetchError::Download {
            url: url.to_string(),
            reason,
        };

        let offset = if options.resume {
            fs::metadata(partial).map(|m| m.len()).unwrap_or(0)
        } else {
            0
        };

        let mut request = self.client.get(url);
        for header in &options.headers {
            let Some((name, value)) = header.split_once(':') else {
                warn!("Ignoring malformed header {:?}", header);
                continue;
            };
            match (
                HeaderName::from_bytes(name.trim().as_bytes()),
                HeaderValue::from_str(value.trim()),
            ) {
                (Ok(name), Ok(value)) => request = request.header(name, value),
                _ => warn!("Ignoring malformed header {:?}", header),
            }
        }
        if offset > 0 {
            debug!("Resuming download of {} at byte {}", url, offset);
            request = request.header(RANGE, format!("bytes={}-", offset));
        }

        let mut response = request.send().map_err(|e| download_err(e.to_string()))?;
        let status = response.status();

        let mut file = match status {
            StatusCode::PARTIAL_CONTENT if offset > 0 => {
                OpenOptions::new().append(true).open(partial)?
            }
            StatusCode::RANGE_NOT_SATISFIABLE if offset > 0 => {
                // Partial already holds the whole resource
                return Ok(());
            }
            s if s.is_success() => File::create(partial)?,
            s => return Err(download_err(format!("HTTP {}", s))),
        };

        let total = response.content_length().unwrap_or(0);
        let label = options.message.as_deref().unwrap_or(url);
        let pb = self.progress_bar(total, label);

        let mut buffer = [0u8; STREAM_BUFFER_SIZE];
        loop {
            let n = response
                .read(&mut buffer)
                .map_err(|e| download_err(format!("Failed to read response: {e}")))?;
            if n == 0 {
                break;
            }
            file.write_all(&buffer[..n])?;
            pb.inc(n as u64);
        }
        pb.finish_and_clear();
        Ok(())
    }
}

impl Fetcher for HttpFetcher {
    fn fetch_if_changed(
        &self,
        url: &str,
        dest: &Path,
        options: &FetchOptions,
    ) -> Result<bool, FetchError> {
        if let Some(expected) = options.expected_hash.as_deref() {
            if dest.exists() && sha256_file(dest)?.eq_ignore_ascii_case(expected) {
                debug!("{} already matches expected hash", dest.display());
                return Ok(false);
            }
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let partial = partial_path(dest);

        if let Some(source) = url.strip_prefix("file://") {
            fs::copy(source, &partial).map_err(|e| FetchError::Download {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        } else {
            info!("Downloading {}", url);
            self.download_http(url, &partial, options)?;
        }

        if options.verify {
            if let Some(expected) = options.expected_hash.as_deref() {
                let actual = sha256_file(&partial)?;
                if !actual.eq_ignore_ascii_case(expected) {
                    if let Err(e) = fs::remove_file(&partial) {
                        warn!("Could not remove {}: {}", partial.display(), e);
                    }
                    return Err(FetchError::Verification {
                        path: dest.display().to_string(),
                        expected: expected.to_string(),
                        actual,
                    });
                }
            }
        }

        if dest.exists() && files_identical(&partial, dest) {
            fs::remove_file(&partial)?;
            return Ok(false);
        }
        fs::rename(&partial, dest)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_url(path: &Path) -> String {
        format!("file://{}", path.display())
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/cache/Foo-1.0.dmg")),
            PathBuf::from("/cache/Foo-1.0.dmg.download")
        );
    }

    #[test]
    fn test_file_fetch_reports_changes() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("source.plist");
        let dest = tmp.path().join("cache/copy.plist");
        fs::write(&source, b"one").unwrap();

        let fetcher = HttpFetcher::new().unwrap();
        let opts = FetchOptions::default();
        assert!(fetcher.fetch_if_changed(&file_url(&source), &dest, &opts).unwrap());
        assert!(!fetcher.fetch_if_changed(&file_url(&source), &dest, &opts).unwrap());
        assert!(!partial_path(&dest).exists());

        fs::write(&source, b"two").unwrap();
        assert!(fetcher.fetch_if_changed(&file_url(&source), &dest, &opts).unwrap());
        assert_eq!(fs::read(&dest).unwrap(), b"two");
    }

    #[test]
    fn test_verification_failure_removes_partial() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("payload.dmg");
        let dest = tmp.path().join("cache/payload.dmg");
        fs::write(&source, b"payload").unwrap();

        let fetcher = HttpFetcher::new().unwrap();
        let opts = FetchOptions {
            verify: true,
            expected_hash: Some("00".repeat(32)),
            ..Default::default()
        };
        let err = fetcher
            .fetch_if_changed(&file_url(&source), &dest, &opts)
            .unwrap_err();
        assert!(matches!(err, FetchError::Verification { .. }));
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[test]
    fn test_expected_hash_short_circuits() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("payload.dmg");
        fs::write(&dest, b"payload").unwrap();
        let hash = sha256_file(&dest).unwrap();

        let fetcher = HttpFetcher::new().unwrap();
        let opts = FetchOptions {
            verify: true,
            expected_hash: Some(hash),
            ..Default::default()
        };
        // Source doesn't exist; the cached copy already matches
        let changed = fetcher
            .fetch_if_changed("file:///nonexistent/payload.dmg", &dest, &opts)
            .unwrap();
        assert!(!changed);
    }
}
