//! Verified local cache of Sigstore trust material
//!
//! This crate keeps an on-disk cache of trust material (signing CA
//! certificates, transparency log keys and their usage metadata) in step with
//! a TUF trust repository:
//! - [`TrustAnchorBundle`] - pinned bootstrap root and default targets
//! - [`LocalCache`] - the `metadata/` + `targets/` working cache
//! - [`needs_refresh`] - offline staleness check against the cached timestamp
//! - [`TrustUpdater`] - refresh, delegation walk and target materialization
//! - [`DelegationGraph`] - usage-scoped target resolution
//!
//! # Features
//!
//! - `tuf` - Enable [`TufMetadataClient`], the production [`MetadataClient`]
//!   built on the `tough` TUF client.
//!
//! # Example
//!
//! ```no_run
//! use sigstore_trust_cache::{LocalCache, TrustAnchorBundle, PUBLIC_GOOD_ROOT_DIGEST};
//!
//! # async fn example() -> Result<(), sigstore_trust_cache::Error> {
//! let bundle = TrustAnchorBundle::from_dir("anchors", PUBLIC_GOOD_ROOT_DIGEST)?;
//! let cache = LocalCache::prepare("/tmp/sigstore-root", &bundle).await?;
//!
//! if sigstore_trust_cache::needs_refresh(&cache) {
//!     println!("trust metadata is stale");
//! }
//! # Ok(())
//! # }
//! ```

pub mod anchor;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod metadata;
pub mod pattern;
pub mod staleness;
pub mod sync;
pub mod usage;

#[cfg(feature = "tuf")]
pub mod tuf;

pub use anchor::{TrustAnchorBundle, DEFAULT_TARGETS, PUBLIC_GOOD_ROOT_DIGEST};
pub use cache::{is_created, LocalCache, MetadataStage};
pub use client::{ClientFuture, MetadataClient};
pub use config::{TrustConfig, PUBLIC_GOOD_URL, STAGING_URL};
pub use error::{Error, Result};
pub use metadata::{TargetRecord, TargetStatus, Usage, UsageMetadata};
pub use pattern::PathPattern;
pub use staleness::{needs_refresh, needs_refresh_at};
pub use sync::{SyncReport, TrustUpdater};
pub use usage::{DelegationGraph, RoleSource};

#[cfg(feature = "tuf")]
pub use tuf::TufMetadataClient;
