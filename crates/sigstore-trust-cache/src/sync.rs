//! Synchronization of the local cache with the trust repository
//!
//! While the cached timestamp is fresh no refresh runs: the targets resolved
//! from cached metadata are checked against `targets/` and the network is used
//! only to fill in targets an earlier, interrupted sync did not place. Once the
//! timestamp is stale the metadata client refreshes the role documents into a
//! staging area, which is promoted into the cache only when the refresh
//! completes. The delegation graph is then walked for every configured usage,
//! and each resolved target missing from the cache is downloaded, verified and
//! placed.
//!
//! Network failures and timeouts abort the sync and are retryable: a retry
//! resumes with whatever is still missing. A target
//! whose content does not match its metadata is never placed; the remaining
//! targets are still processed, then the sync fails with the first such
//! [`Error::TargetIntegrity`].

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::anchor::TrustAnchorBundle;
use crate::cache::LocalCache;
use crate::client::{ClientFuture, MetadataClient};
use crate::config::TrustConfig;
use crate::metadata::{TargetRecord, Usage};
use crate::staleness;
use crate::usage::{DelegationGraph, TOP_LEVEL_ROLE};
use crate::{Error, Result};

/// Outcome of a successful [`TrustUpdater::sync`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Whether a metadata refresh ran
    pub refreshed: bool,
    /// Number of targets resolved across the configured usages
    pub resolved: usize,
    /// Targets downloaded during this sync
    pub fetched: Vec<String>,
    /// Targets already present and matching
    pub already_cached: usize,
}

/// Keeps a [`LocalCache`] in step with the trust repository
pub struct TrustUpdater<C> {
    cache: LocalCache,
    client: C,
    usages: Vec<Usage>,
    timeout: Option<Duration>,
}

impl<C: MetadataClient> TrustUpdater<C> {
    /// Create an updater for all recognised usages with no timeout
    pub fn new(cache: LocalCache, client: C) -> Self {
        Self {
            cache,
            client,
            usages: Usage::RECOGNIZED.to_vec(),
            timeout: None,
        }
    }

    /// Create an updater using the usages and timeout from `config`
    pub fn from_config(cache: LocalCache, client: C, config: &TrustConfig) -> Self {
        Self {
            cache,
            client,
            usages: config.usages.clone(),
            timeout: config.timeout,
        }
    }

    /// Prepare the cache named by `config` from `bundle` and wrap it
    pub async fn prepare(config: &TrustConfig, bundle: &TrustAnchorBundle, client: C) -> Result<Self> {
        let cache = LocalCache::prepare(config.cache_dir()?, bundle).await?;
        Ok(Self::from_config(cache, client, config))
    }

    /// Bound every network operation by `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Restrict synchronization to `usages`
    pub fn with_usages(mut self, usages: Vec<Usage>) -> Self {
        self.usages = usages;
        self
    }

    /// The underlying cache
    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    /// Whether the next [`sync`](Self::sync) will refresh metadata
    pub fn needs_refresh(&self) -> bool {
        staleness::needs_refresh(&self.cache)
    }

    /// Bring the cache up to date
    ///
    /// With a fresh timestamp and every resolved target in place this
    /// performs no network access.
    pub async fn sync(&self) -> Result<SyncReport> {
        if self.needs_refresh() {
            return self.force_sync().await;
        }
        debug!("trust metadata is fresh, skipping refresh");
        self.materialize(false).await
    }

    /// Refresh and materialize targets regardless of the cached timestamp
    pub async fn force_sync(&self) -> Result<SyncReport> {
        info!(root = %self.cache.root().display(), "refreshing trust metadata");
        self.refresh_metadata().await?;
        self.materialize(true).await
    }

    async fn refresh_metadata(&self) -> Result<()> {
        let stage = self.cache.begin_refresh().await?;
        self.bounded(self.client.refresh(&stage)).await?;
        self.cache.commit_refresh(stage).await
    }

    /// Place every resolved target that is not already cached
    async fn materialize(&self, refreshed: bool) -> Result<SyncReport> {
        let records = self.resolve()?;
        let mut report = SyncReport {
            refreshed,
            resolved: records.len(),
            ..Default::default()
        };

        let mut first_failure = None;
        for record in &records {
            if self.cache.find_cached_target(record).await?.is_some() {
                report.already_cached += 1;
                continue;
            }

            let data = self.bounded(self.client.download_target(record)).await?;
            match self.cache.store_target(record, &data).await {
                Ok(path) => {
                    info!(target_name = %record.name, path = %path.display(), "cached target");
                    report.fetched.push(record.name.clone());
                }
                Err(e @ Error::TargetIntegrity { .. }) => {
                    error!(error = %e, "rejected target content");
                    first_failure.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(e) = first_failure {
            return Err(e);
        }

        if refreshed || !report.fetched.is_empty() {
            info!(
                resolved = report.resolved,
                fetched = report.fetched.len(),
                already_cached = report.already_cached,
                "trust cache synchronized"
            );
        }
        Ok(report)
    }

    /// Targets of all configured usages, from cached metadata
    ///
    /// When the same identifier belongs to several usages the first
    /// configured usage's listing is kept.
    pub fn resolve(&self) -> Result<Vec<TargetRecord>> {
        let graph = DelegationGraph::load(&self.cache)?.ok_or_else(|| Error::UntrustedMetadata {
            role: TOP_LEVEL_ROLE.into(),
            reason: "top-level targets role is not available".into(),
        })?;

        let mut merged: BTreeMap<String, TargetRecord> = BTreeMap::new();
        for usage in &self.usages {
            for record in graph.resolve_usage(usage.as_str())? {
                match merged.get(&record.name) {
                    Some(existing) if existing.sha256 != record.sha256 => {
                        warn!(
                            target_name = %record.name,
                            usage = %usage,
                            "target listed with conflicting digests across usages"
                        );
                    }
                    Some(_) => {}
                    None => {
                        merged.insert(record.name.clone(), record);
                    }
                }
            }
        }
        Ok(merged.into_values().collect())
    }

    /// Active targets for one usage from cached metadata, without network
    ///
    /// Returns an empty set before the first refresh or for an unrecognised
    /// usage.
    pub fn targets_for_usage(&self, usage: &str) -> Result<Vec<TargetRecord>> {
        match DelegationGraph::load(&self.cache)? {
            Some(graph) => graph.resolve_usage(usage),
            None => Ok(Vec::new()),
        }
    }

    /// Look up one target by identifier in cached metadata
    pub fn target_info(&self, name: &str) -> Result<Option<TargetRecord>> {
        match DelegationGraph::load(&self.cache)? {
            Some(graph) => graph.find_target(name),
            None => Ok(None),
        }
    }

    async fn bounded<T>(&self, operation: ClientFuture<'_, T>) -> Result<T> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, operation)
                .await
                .map_err(|_| Error::Timeout(limit))?,
            None => operation.await,
        }
    }
}
