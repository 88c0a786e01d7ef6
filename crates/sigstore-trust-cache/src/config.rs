//! Configuration for the trust cache and its repository

use std::path::PathBuf;
use std::time::Duration;

use crate::metadata::Usage;
use crate::{Error, Result};

/// Public-good trust repository, serving metadata at its root
pub const PUBLIC_GOOD_URL: &str = "https://storage.googleapis.com/sigstore-tuf-root/";

/// Staging trust repository
pub const STAGING_URL: &str = "https://storage.googleapis.com/tuf-root-staging/";

/// Configuration for synchronizing a trust cache
#[derive(Debug, Clone)]
pub struct TrustConfig {
    /// Base URL serving metadata documents
    pub metadata_url: String,
    /// Base URL serving target content
    pub targets_url: String,
    /// Path to the cache root (defaults to `~/.sigstore/root`)
    pub cache_dir: Option<PathBuf>,
    /// Bound on each network operation
    pub timeout: Option<Duration>,
    /// Usage categories a sync materialises
    pub usages: Vec<Usage>,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self::for_repository(PUBLIC_GOOD_URL)
    }
}

impl TrustConfig {
    /// Create configuration for the public-good instance
    pub fn production() -> Self {
        Self::default()
    }

    /// Create configuration for the staging instance
    pub fn staging() -> Self {
        Self::for_repository(STAGING_URL)
    }

    /// Configuration for a repository serving metadata at `base_url` and
    /// targets under `base_url/targets/`
    pub fn for_repository(base_url: &str) -> Self {
        let base = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        Self {
            targets_url: format!("{}targets/", base),
            metadata_url: base,
            cache_dir: None,
            timeout: None,
            usages: Usage::RECOGNIZED.to_vec(),
        }
    }

    /// Set the cache directory
    pub fn with_cache_dir(mut self, path: PathBuf) -> Self {
        self.cache_dir = Some(path);
        self
    }

    /// Bound every refresh and target fetch by `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Restrict synchronization to the given usage categories
    pub fn with_usages(mut self, usages: Vec<Usage>) -> Self {
        self.usages = usages;
        self
    }

    /// Use a separate base URL for target content
    pub fn with_targets_url(mut self, url: impl Into<String>) -> Self {
        self.targets_url = url.into();
        self
    }

    /// The cache root this configuration points at
    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        default_cache_dir()
    }
}

/// Default cache root: `~/.sigstore/root`
pub fn default_cache_dir() -> Result<PathBuf> {
    let dirs = directories::BaseDirs::new()
        .ok_or_else(|| Error::Config("could not determine home directory".into()))?;
    Ok(dirs.home_dir().join(".sigstore").join("root"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = TrustConfig::default();
        assert_eq!(config.metadata_url, PUBLIC_GOOD_URL);
        assert_eq!(
            config.targets_url,
            "https://storage.googleapis.com/sigstore-tuf-root/targets/"
        );
        assert!(config.cache_dir.is_none());
        assert!(config.timeout.is_none());
        assert_eq!(config.usages.len(), 4);
    }

    #[test]
    fn test_config_staging() {
        let config = TrustConfig::staging();
        assert_eq!(config.metadata_url, STAGING_URL);
    }

    #[test]
    fn test_for_repository_normalizes_trailing_slash() {
        let config = TrustConfig::for_repository("https://tuf.example.com");
        assert_eq!(config.metadata_url, "https://tuf.example.com/");
        assert_eq!(config.targets_url, "https://tuf.example.com/targets/");
    }

    #[test]
    fn test_config_builder() {
        let config = TrustConfig::production()
            .with_cache_dir(PathBuf::from("/tmp/test"))
            .with_timeout(Duration::from_secs(30))
            .with_usages(vec![Usage::SigningCa]);
        assert_eq!(config.cache_dir().unwrap(), PathBuf::from("/tmp/test"));
        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.usages, vec![Usage::SigningCa]);
    }
}
