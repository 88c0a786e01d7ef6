//! TUF-backed metadata client
//!
//! [`TufMetadataClient`] drives the `tough` TUF client over HTTPS. A refresh
//! loads and verifies the repository starting from the staged `root.json`,
//! with the stage as tough's datastore, then stores the verified timestamp,
//! top-level targets and every delegated targets role in the stage.
//!
//! # Example
//!
//! ```no_run
//! use sigstore_trust_cache::{TrustAnchorBundle, TrustConfig, TrustUpdater, TufMetadataClient};
//!
//! # async fn example() -> Result<(), sigstore_trust_cache::Error> {
//! let config = TrustConfig::production();
//! let bundle = TrustAnchorBundle::public_good("/usr/share/sigstore/anchors")?;
//! let client = TufMetadataClient::new(&config)?;
//!
//! let updater = TrustUpdater::prepare(&config, &bundle, client).await?;
//! updater.sync().await?;
//! let cas = updater.targets_for_usage("signing-ca")?;
//! # Ok(())
//! # }
//! ```

use tokio::sync::RwLock;
use tough::{HttpTransport, IntoVec, Repository, RepositoryLoader, TargetName};
use tracing::debug;
use url::Url;

use crate::anchor::ROOT_FILE;
use crate::cache::{MetadataStage, TARGETS_FILE, TIMESTAMP_FILE};
use crate::client::{ClientFuture, MetadataClient};
use crate::config::TrustConfig;
use crate::metadata::TargetRecord;
use crate::usage::TOP_LEVEL_ROLE;
use crate::{Error, Result};

/// Metadata client for a TUF repository reachable over HTTPS
pub struct TufMetadataClient {
    metadata_url: Url,
    targets_url: Url,
    repository: RwLock<Option<Repository>>,
}

impl TufMetadataClient {
    /// Create a client for the repository named by `config`
    pub fn new(config: &TrustConfig) -> Result<Self> {
        let metadata_url = Url::parse(&config.metadata_url)
            .map_err(|e| Error::Config(format!("metadata URL '{}': {}", config.metadata_url, e)))?;
        let targets_url = Url::parse(&config.targets_url)
            .map_err(|e| Error::Config(format!("targets URL '{}': {}", config.targets_url, e)))?;
        Ok(Self {
            metadata_url,
            targets_url,
            repository: RwLock::new(None),
        })
    }

    /// Create a client for the public-good instance
    pub fn production() -> Result<Self> {
        Self::new(&TrustConfig::production())
    }

    /// Create a client for the staging instance
    pub fn staging() -> Result<Self> {
        Self::new(&TrustConfig::staging())
    }

    async fn load(&self, stage: &MetadataStage) -> Result<()> {
        let root_bytes = stage
            .read(ROOT_FILE)?
            .ok_or_else(|| Error::UntrustedMetadata {
                role: "root".into(),
                reason: "cache has no root document; prepare it first".into(),
            })?;

        // Load the repository (fetches and verifies all metadata)
        let repo = RepositoryLoader::new(
            &root_bytes,
            self.metadata_url.clone(),
            self.targets_url.clone(),
        )
        .transport(HttpTransport::default())
        .datastore(stage.dir().to_path_buf())
        .load()
        .await
        .map_err(|e| classify("root", e))?;

        let mut documents = Vec::new();
        delegated_documents(&repo.targets().signed, &mut documents)?;
        for (file_name, data) in &documents {
            stage.write(file_name, data).await?;
        }
        stage
            .write(TARGETS_FILE, &serde_json::to_vec(repo.targets())?)
            .await?;
        stage
            .write(TIMESTAMP_FILE, &serde_json::to_vec(repo.timestamp())?)
            .await?;
        debug!(delegated = documents.len(), "staged verified role documents");

        *self.repository.write().await = Some(repo);
        Ok(())
    }

    async fn fetch(&self, record: &TargetRecord) -> Result<Vec<u8>> {
        let guard = self.repository.read().await;
        let repo = guard.as_ref().ok_or_else(|| Error::UntrustedMetadata {
            role: TOP_LEVEL_ROLE.into(),
            reason: "no verified metadata loaded; refresh first".into(),
        })?;

        let target = TargetName::new(record.name.as_str())
            .map_err(|e| Error::InvalidTargetName(format!("{}: {}", record.name, e)))?;
        let stream = repo
            .read_target(&target)
            .await
            .map_err(|e| classify(&record.name, e))?
            .ok_or_else(|| Error::TargetNotFound(record.name.clone()))?;

        stream
            .into_vec()
            .await
            .map_err(|e| classify(&record.name, e))
    }
}

impl MetadataClient for TufMetadataClient {
    fn refresh<'a>(&'a self, stage: &'a MetadataStage) -> ClientFuture<'a, ()> {
        Box::pin(self.load(stage))
    }

    fn download_target<'a>(&'a self, record: &'a TargetRecord) -> ClientFuture<'a, Vec<u8>> {
        Box::pin(self.fetch(record))
    }
}

/// Serialize every loaded delegated targets role as `<name>.json`
fn delegated_documents(
    targets: &tough::schema::Targets,
    out: &mut Vec<(String, Vec<u8>)>,
) -> Result<()> {
    let Some(delegations) = targets.delegations.as_ref() else {
        return Ok(());
    };
    for role in &delegations.roles {
        if let Some(signed) = role.targets.as_ref() {
            out.push((format!("{}.json", role.name), serde_json::to_vec(signed)?));
            delegated_documents(&signed.signed, out)?;
        }
    }
    Ok(())
}

/// Transport failures are retryable; everything else tough reports is a
/// verification failure.
fn classify(subject: &str, err: tough::error::Error) -> Error {
    if matches!(err, tough::error::Error::Transport { .. }) {
        Error::Network(err.to_string())
    } else {
        Error::UntrustedMetadata {
            role: subject.to_string(),
            reason: err.to_string(),
        }
    }
}
