//! Working cache of trust metadata and target files
//!
//! # Directory Structure
//!
//! ```text
//! cache_root/
//! ├── metadata/
//! │   ├── root.json
//! │   ├── timestamp.json
//! │   ├── snapshot.json
//! │   ├── targets.json
//! │   └── <delegated-role>.json
//! └── targets/
//!     ├── fulcio.crt.pem
//!     └── ...
//! ```
//!
//! Directories are created owner-only (`0700`). Every file the cache writes is
//! written to a temporary sibling and renamed into place, so concurrent
//! readers never observe a partially written document.
//!
//! A metadata refresh never writes into `metadata/` directly. It works in a
//! [`MetadataStage`] under the cache root, and only a completed refresh is
//! promoted with [`LocalCache::commit_refresh`], `timestamp.json` last.

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::anchor::{TrustAnchorBundle, ROOT_FILE};
use crate::metadata::{Signed, TargetRecord, TargetsRole};
use crate::usage::RoleSource;
use crate::{Error, Result};

/// Name of the metadata subdirectory
pub const METADATA_DIR: &str = "metadata";

/// Name of the targets subdirectory
pub const TARGETS_DIR: &str = "targets";

/// File name of the cached timestamp role
pub const TIMESTAMP_FILE: &str = "timestamp.json";

/// File name of the cached top-level targets role
pub const TARGETS_FILE: &str = "targets.json";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Hex SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Handle to a prepared trust cache
#[derive(Debug, Clone)]
pub struct LocalCache {
    root: PathBuf,
    metadata_dir: PathBuf,
    targets_dir: PathBuf,
}

impl LocalCache {
    /// Handle to the cache at `root` without bootstrapping it
    ///
    /// Useful for read-only inspection; use [`LocalCache::prepare`] before
    /// synchronizing.
    pub fn open(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            metadata_dir: root.join(METADATA_DIR),
            targets_dir: root.join(TARGETS_DIR),
            root,
        }
    }

    /// Bootstrap the cache at `root` from `bundle`, or reuse it if present
    ///
    /// The bundle's root document is checked against its pinned digest first;
    /// on mismatch nothing is written and [`Error::BootstrapIntegrity`] is
    /// returned. When `metadata/root.json` already exists the cache is returned
    /// unchanged. Otherwise the directories are created and the default
    /// targets and root document are copied in, the root last so that its
    /// presence marks a complete bootstrap.
    pub async fn prepare(root: impl AsRef<Path>, bundle: &TrustAnchorBundle) -> Result<Self> {
        bundle.verify()?;

        let cache = Self::open(root);
        if cache.is_bootstrapped() {
            debug!(root = %cache.root.display(), "reusing existing trust cache");
            return Ok(cache);
        }

        info!(root = %cache.root.display(), "bootstrapping trust cache");
        create_private_dir(&cache.root).await?;
        create_private_dir(&cache.metadata_dir).await?;
        create_private_dir(&cache.targets_dir).await?;

        for (name, data) in bundle.targets() {
            let path = cache.target_path(name)?;
            if fs::try_exists(&path)
                .await
                .map_err(|e| Error::cache_access(&path, e))?
            {
                continue;
            }
            write_atomic(&path, data).await?;
            debug!(target_name = %name, "copied bundled target");
        }

        write_atomic(&cache.metadata_dir.join(ROOT_FILE), bundle.root()).await?;
        Ok(cache)
    }

    /// Root directory of the cache
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding role documents
    pub fn metadata_dir(&self) -> &Path {
        &self.metadata_dir
    }

    /// Directory holding target files
    pub fn targets_dir(&self) -> &Path {
        &self.targets_dir
    }

    /// Whether a root document is in place
    pub fn is_bootstrapped(&self) -> bool {
        self.metadata_dir.join(ROOT_FILE).is_file()
    }

    /// Whether a refresh has completed at least once
    pub fn is_created(&self) -> bool {
        self.metadata_dir.join(TIMESTAMP_FILE).is_file()
    }

    /// Read a role document from `metadata/`
    pub fn read_metadata(&self, file_name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.metadata_dir.join(file_name);
        match std::fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::cache_access(path, e)),
        }
    }

    /// Atomically replace a role document in `metadata/`
    pub async fn write_metadata(&self, file_name: &str, data: &[u8]) -> Result<()> {
        validate_relative(file_name)?;
        write_atomic(&self.metadata_dir.join(file_name), data).await
    }

    /// Path a target is cached under
    ///
    /// Rejects identifiers that are absolute or contain `.`/`..` components.
    pub fn target_path(&self, name: &str) -> Result<PathBuf> {
        validate_relative(name)?;
        Ok(self.targets_dir.join(name))
    }

    /// Read a cached target's contents
    pub async fn read_target(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.target_path(name)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::cache_access(path, e)),
        }
    }

    /// Path of a cached copy of `record` whose content matches it
    ///
    /// Returns `None` when no copy exists or the cached copy is stale.
    pub async fn find_cached_target(&self, record: &TargetRecord) -> Result<Option<PathBuf>> {
        let path = self.target_path(&record.name)?;
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::cache_access(path, e)),
        };
        if data.len() as u64 == record.length && sha256_hex(&data) == record.sha256 {
            Ok(Some(path))
        } else {
            debug!(target_name = %record.name, "cached copy does not match current metadata");
            Ok(None)
        }
    }

    /// Verify `data` against `record` and place it in `targets/`
    ///
    /// Nothing is written when the content does not match.
    pub async fn store_target(&self, record: &TargetRecord, data: &[u8]) -> Result<PathBuf> {
        let actual = sha256_hex(data);
        if actual != record.sha256 || data.len() as u64 != record.length {
            return Err(Error::TargetIntegrity {
                target: record.name.clone(),
                expected: record.sha256.clone(),
                actual,
            });
        }
        let path = self.target_path(&record.name)?;
        write_atomic(&path, data).await?;
        Ok(path)
    }

    /// Open a staging area for a metadata refresh
    ///
    /// The stage starts as a copy of the current role documents so a client
    /// can compare new metadata against the versions already trusted.
    pub async fn begin_refresh(&self) -> Result<MetadataStage> {
        let stage = MetadataStage {
            dir: self.root.join(format!(
                ".refresh-{}-{}",
                std::process::id(),
                TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
            )),
        };
        create_private_dir(&stage.dir).await?;
        for (file_name, data) in list_documents(&self.metadata_dir).await? {
            write_atomic(&stage.dir.join(file_name), &data).await?;
        }
        Ok(stage)
    }

    /// Promote the documents of a completed refresh into `metadata/`
    ///
    /// `timestamp.json` is written last, so an interrupted commit still
    /// leaves the cache stale rather than fresh over partial metadata.
    pub async fn commit_refresh(&self, stage: MetadataStage) -> Result<()> {
        let mut timestamp = None;
        let mut promoted = 0usize;
        for (file_name, data) in list_documents(&stage.dir).await? {
            if file_name == TIMESTAMP_FILE {
                timestamp = Some(data);
                continue;
            }
            write_atomic(&self.metadata_dir.join(&file_name), &data).await?;
            promoted += 1;
        }
        if let Some(data) = timestamp {
            write_atomic(&self.metadata_dir.join(TIMESTAMP_FILE), &data).await?;
            promoted += 1;
        }
        debug!(promoted, "committed refreshed metadata");
        Ok(())
    }

    fn load_role(&self, file_name: &str) -> Result<Option<TargetsRole>> {
        match self.read_metadata(file_name)? {
            Some(data) => {
                let role: Signed<TargetsRole> = serde_json::from_slice(&data)?;
                Ok(Some(role.signed))
            }
            None => Ok(None),
        }
    }
}

impl RoleSource for LocalCache {
    fn top_level(&self) -> Result<Option<TargetsRole>> {
        self.load_role(TARGETS_FILE)
    }

    fn delegated(&self, name: &str) -> Result<Option<TargetsRole>> {
        validate_relative(name)?;
        self.load_role(&format!("{}.json", name))
    }
}

/// Scratch directory a metadata refresh writes into
///
/// Removed when dropped, whether or not it was committed.
#[derive(Debug)]
pub struct MetadataStage {
    dir: PathBuf,
}

impl MetadataStage {
    /// Directory holding the staged documents
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read a staged document
    pub fn read(&self, file_name: &str) -> Result<Option<Vec<u8>>> {
        validate_relative(file_name)?;
        let path = self.dir.join(file_name);
        match std::fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::cache_access(path, e)),
        }
    }

    /// Atomically replace a staged document
    pub async fn write(&self, file_name: &str, data: &[u8]) -> Result<()> {
        validate_relative(file_name)?;
        write_atomic(&self.dir.join(file_name), data).await
    }
}

impl Drop for MetadataStage {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.dir.display(), error = %e, "failed to remove refresh stage");
            }
        }
    }
}

/// Whether the cache at `root` has completed at least one refresh
pub fn is_created(root: impl AsRef<Path>) -> bool {
    LocalCache::open(root).is_created()
}

fn validate_relative(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.contains('\\')
        && name.split('/').all(|segment| {
            matches!(
                Path::new(segment).components().next(),
                Some(Component::Normal(_))
            )
        });
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidTargetName(name.to_string()))
    }
}

/// Role documents directly under `dir`, by file name
///
/// Hidden files (including in-flight temporaries) and subdirectories are
/// skipped. A missing directory holds no documents.
async fn list_documents(dir: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::cache_access(dir, e)),
    };

    let mut documents = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::cache_access(dir, e))?
    {
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if file_name.starts_with('.') || !file_name.ends_with(".json") || !path.is_file() {
            continue;
        }
        let data = fs::read(&path)
            .await
            .map_err(|e| Error::cache_access(&path, e))?;
        documents.push((file_name.to_string(), data));
    }
    documents.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(documents)
}

async fn create_private_dir(path: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    match builder.create(path).await {
        Ok(()) => Ok(()),
        // Another process won the race.
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) => Err(Error::cache_access(path, e)),
    }
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::InvalidTargetName(path.display().to_string()))?;
    create_private_dir(parent).await?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidTargetName(path.display().to_string()))?;
    let tmp = parent.join(format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    if let Err(e) = fs::write(&tmp, data).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(Error::cache_access(tmp, e));
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(Error::cache_access(path, e));
    }
    Ok(())
}
