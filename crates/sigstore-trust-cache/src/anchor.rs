//! Trust anchors shipped with the implementation
//!
//! A [`TrustAnchorBundle`] holds the bootstrap root document, the default
//! target files and the SHA-256 digest the root document is pinned to. The
//! digest is the sole root of all downstream trust: a bundle whose root does
//! not hash to it is rejected before anything is written to disk.

use std::path::Path;

use tracing::debug;

use crate::cache::sha256_hex;
use crate::{Error, Result};

/// Digest of the public-good instance's bootstrap root (`4.root.json`)
pub const PUBLIC_GOOD_ROOT_DIGEST: &str =
    "8e34a5c236300b92d0833b205f814d4d7206707fc870d3ff6dcf49f10e56ca0a";

/// Default targets bundled for the public-good and staging instances
pub const DEFAULT_TARGETS: &[&str] = &[
    "ctfe.pub",
    "ctfe.staging.pub",
    "fulcio_intermediate.crt.pem",
    "fulcio_intermediate.crt.staging.pem",
    "fulcio.crt.pem",
    "fulcio.crt.staging.pem",
    "rekor.pub",
    "rekor.staging.pub",
];

/// File name of the root document, both in an anchor directory and in the
/// cache's `metadata/` directory
pub const ROOT_FILE: &str = "root.json";

/// Immutable set of bootstrap trust material
#[derive(Debug, Clone)]
pub struct TrustAnchorBundle {
    root: Vec<u8>,
    targets: Vec<(String, Vec<u8>)>,
    pinned_digest: String,
}

impl TrustAnchorBundle {
    /// Create a bundle from in-memory documents
    pub fn new(
        root: impl Into<Vec<u8>>,
        targets: Vec<(String, Vec<u8>)>,
        pinned_digest: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            targets,
            pinned_digest: pinned_digest.into().to_ascii_lowercase(),
        }
    }

    /// Load a bundle from an anchor directory
    ///
    /// The directory holds `root.json` and a `targets/` subdirectory with the
    /// [`DEFAULT_TARGETS`]. Default targets absent from the directory are
    /// skipped; other files are ignored.
    ///
    /// ```text
    /// anchors/
    /// ├── root.json
    /// └── targets/
    ///     ├── fulcio.crt.pem
    ///     └── rekor.pub
    /// ```
    pub fn from_dir(dir: impl AsRef<Path>, pinned_digest: impl Into<String>) -> Result<Self> {
        Self::from_dir_with_targets(dir, pinned_digest, DEFAULT_TARGETS)
    }

    /// Load a bundle from an anchor directory, taking the named targets
    pub fn from_dir_with_targets(
        dir: impl AsRef<Path>,
        pinned_digest: impl Into<String>,
        names: &[&str],
    ) -> Result<Self> {
        let dir = dir.as_ref();
        let root_path = dir.join(ROOT_FILE);
        let root = std::fs::read(&root_path).map_err(|e| Error::cache_access(&root_path, e))?;

        let targets_dir = dir.join("targets");
        let mut targets = Vec::with_capacity(names.len());
        for name in names {
            let path = targets_dir.join(name);
            match std::fs::read(&path) {
                Ok(data) => targets.push((name.to_string(), data)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(target_name = %name, "bundled target not present");
                }
                Err(e) => return Err(Error::cache_access(&path, e)),
            }
        }
        targets.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(Self::new(root, targets, pinned_digest))
    }

    /// Load a bundle for the public-good instance from an anchor directory
    pub fn public_good(dir: impl AsRef<Path>) -> Result<Self> {
        Self::from_dir(dir, PUBLIC_GOOD_ROOT_DIGEST)
    }

    /// The bootstrap root document
    pub fn root(&self) -> &[u8] {
        &self.root
    }

    /// Default target files as `(name, contents)`
    pub fn targets(&self) -> &[(String, Vec<u8>)] {
        &self.targets
    }

    /// The pinned digest, lowercase hex
    pub fn pinned_digest(&self) -> &str {
        &self.pinned_digest
    }

    /// Hex SHA-256 of the root document
    pub fn root_digest(&self) -> String {
        sha256_hex(&self.root)
    }

    /// Check the root document against the pinned digest
    pub fn verify(&self) -> Result<()> {
        let actual = self.root_digest();
        if actual != self.pinned_digest {
            return Err(Error::BootstrapIntegrity {
                expected: self.pinned_digest.clone(),
                actual,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_verify_matching_digest() {
        let bundle = TrustAnchorBundle::new(b"hello".to_vec(), vec![], HELLO_SHA256);
        assert_eq!(bundle.root_digest(), HELLO_SHA256);
        bundle.verify().unwrap();
    }

    #[test]
    fn test_pinned_digest_is_case_insensitive() {
        let bundle =
            TrustAnchorBundle::new(b"hello".to_vec(), vec![], HELLO_SHA256.to_uppercase());
        bundle.verify().unwrap();
    }

    #[test]
    fn test_verify_mismatch() {
        let bundle = TrustAnchorBundle::new(b"hello!".to_vec(), vec![], HELLO_SHA256);
        let err = bundle.verify().unwrap_err();
        match err {
            Error::BootstrapIntegrity { expected, actual } => {
                assert_eq!(expected, HELLO_SHA256);
                assert_ne!(actual, HELLO_SHA256);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(ROOT_FILE), b"hello").unwrap();
        std::fs::create_dir(dir.path().join("targets")).unwrap();
        std::fs::write(dir.path().join("targets/rekor.pub"), b"rekor").unwrap();
        std::fs::write(dir.path().join("targets/fulcio.crt.pem"), b"fulcio").unwrap();
        std::fs::write(dir.path().join("targets/README.md"), b"not a target").unwrap();

        let bundle = TrustAnchorBundle::from_dir(dir.path(), HELLO_SHA256).unwrap();
        bundle.verify().unwrap();
        let names: Vec<_> = bundle.targets().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["fulcio.crt.pem", "rekor.pub"]);
    }

    #[test]
    fn test_from_dir_with_named_targets() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(ROOT_FILE), b"hello").unwrap();
        std::fs::create_dir(dir.path().join("targets")).unwrap();
        std::fs::write(dir.path().join("targets/rekor.pub"), b"rekor").unwrap();
        std::fs::write(dir.path().join("targets/custom.pem"), b"custom").unwrap();

        let bundle =
            TrustAnchorBundle::from_dir_with_targets(dir.path(), HELLO_SHA256, &["custom.pem"])
                .unwrap();
        assert_eq!(bundle.targets(), [("custom.pem".to_string(), b"custom".to_vec())]);
    }

    #[test]
    fn test_from_dir_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let err = TrustAnchorBundle::public_good(dir.path()).unwrap_err();
        assert!(matches!(err, Error::CacheAccess { .. }));
    }
}
