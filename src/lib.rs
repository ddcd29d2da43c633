// src/lib.rs

//! Cairn managed software client
//!
//! Converges a machine to a declarative, server-hosted description of what
//! should be installed on it. Manifests name catalogs and list items to
//! install, remove, update or offer; catalogs describe every installable
//! version of every item. A check run turns that tree into an ordered plan.
//!
//! # Architecture
//!
//! - Per-run state: a [`resolver::Resolver`] owns the loaded catalogs and
//!   the decisions made so far; nothing is global
//! - Partial success: a missing dependency aborts only the item that needs
//!   it, never the run
//! - Collaborators behind traits: [`fetch::Fetcher`], [`repo::RepoSource`],
//!   [`detect::VendorUpdates`] and [`resolver::DiskSpace`]
//! - Plist documents throughout, normalized once at load time

pub mod cancel;
pub mod catalog;
pub mod check;
pub mod config;
pub mod detect;
mod error;
pub mod facts;
pub mod fetch;
pub mod manifest;
pub mod repo;
pub mod resolver;
pub mod scheduler;
pub mod version;

pub use cancel::CancellationToken;
pub use catalog::{CatalogIndex, CatalogSet, ItemRecord, ItemSelector};
pub use check::{CheckOrchestrator, CheckOutcome, CheckReport};
pub use config::Config;
pub use detect::{InstalledState, InstalledStateDetector};
pub use error::{Error, Result};
pub use manifest::{Manifest, ManifestKey, ManifestWalker};
pub use resolver::{InstallInfo, OutcomeRecord, ResolutionState, Resolver};
pub use scheduler::{ForceInstallScheduler, Urgency};
pub use version::{VersionComparison, compare_versions};
