// src/manifest/walker.rs

//! Manifest tree traversal
//!
//! For one list key at a time, a walk visits a manifest's included manifests
//! first, then the conditional items whose predicates hold, and finally the
//! manifest's own entries, handing each name to the matching resolver
//! operation. Manifests are fetched once per run and cached here.

use super::{Manifest, ManifestKey, predicate};
use crate::error::{Error, Result};
use crate::facts::Facts;
use crate::repo::RepoSource;
use crate::resolver::Resolver;
use std::collections::HashMap;
use tracing::debug;

/// Walks manifest trees, feeding a [`Resolver`]
pub struct ManifestWalker<'w, 'a> {
    resolver: &'w mut Resolver<'a>,
    source: &'w dyn RepoSource,
    facts: &'w Facts,
    cache: HashMap<String, Manifest>,
    stack: Vec<String>,
}

impl<'w, 'a> ManifestWalker<'w, 'a> {
    pub fn new(resolver: &'w mut Resolver<'a>, source: &'w dyn RepoSource, facts: &'w Facts) -> Self {
        Self {
            resolver,
            source,
            facts,
            cache: HashMap::new(),
            stack: Vec::new(),
        }
    }

    /// The resolver being fed
    pub fn resolver(&mut self) -> &mut Resolver<'a> {
        self.resolver
    }

    /// Fetch a manifest by name, once per run
    pub fn manifest(&mut self, name: &str) -> Result<Manifest> {
        if let Some(manifest) = self.cache.get(name) {
            return Ok(manifest.clone());
        }
        let manifest = self.source.manifest(name)?;
        self.cache.insert(name.to_string(), manifest.clone());
        Ok(manifest)
    }

    /// Walk the named manifest for `key`
    ///
    /// An include cycle or unreachable nested manifest skips that branch with
    /// a warning. Only cancellation is returned as an error.
    pub fn walk_named(&mut self, name: &str, key: ManifestKey, inherited: &[String]) -> Result<()> {
        if self.stack.iter().any(|n| n == name) {
            let chain = format!("{} -> {}", self.stack.join(" -> "), name);
            self.resolver
                .state
                .warn(format!("{} (manifest includes {})", Error::CycleDetected(name.to_string()), chain));
            return Ok(());
        }

        let manifest = match self.manifest(name) {
            Ok(manifest) => manifest,
            Err(e) => {
                self.resolver
                    .state
                    .warn(format!("Could not retrieve manifest {}: {}", name, e));
                return Ok(());
            }
        };

        debug!("Processing manifest {} for {}", name, key);
        self.stack.push(name.to_string());
        let result = self.walk(&manifest, name, key, inherited);
        self.stack.pop();
        result
    }

    /// Walk an already-loaded manifest for `key`
    pub fn walk(
        &mut self,
        manifest: &Manifest,
        label: &str,
        key: ManifestKey,
        inherited: &[String],
    ) -> Result<()> {
        self.check_cancelled()?;

        let catalogs: Vec<String> = if manifest.catalogs.is_empty() {
            inherited.to_vec()
        } else {
            self.resolver.load_catalogs(self.source, &manifest.catalogs);
            manifest.catalogs.clone()
        };
        if catalogs.is_empty() {
            self.resolver
                .state
                .warn(format!("Manifest {} has no catalogs", label));
            return Ok(());
        }

        for nested in &manifest.included_manifests {
            self.check_cancelled()?;
            self.walk_named(nested, key, &catalogs)?;
        }

        for item in &manifest.conditional_items {
            self.check_cancelled()?;
            let Some(condition) = item.condition.as_deref() else {
                self.resolver
                    .state
                    .warn(format!("Missing predicate for conditional item in {}", label));
                continue;
            };
            let facts = self.facts.with_catalogs(&catalogs);
            if predicate::evaluate(condition, &facts) {
                debug!("Condition {:?} in {} is true", condition, label);
                self.walk(&item.body(), "embedded manifest", key, &catalogs)?;
            } else {
                debug!("Condition {:?} in {} is false", condition, label);
            }
        }

        for name in manifest.items(key) {
            self.check_cancelled()?;
            match key {
                ManifestKey::ManagedInstalls => {
                    self.resolver.process_install(name, &catalogs);
                }
                ManifestKey::ManagedUninstalls => {
                    self.resolver.process_removal(name, &catalogs);
                }
                ManifestKey::ManagedUpdates => self.resolver.process_managed_update(name, &catalogs),
                ManifestKey::OptionalInstalls => self.resolver.process_optional_install(name, &catalogs),
            }
        }

        Ok(())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.resolver.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
