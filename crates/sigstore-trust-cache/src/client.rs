//! Interface to the signed-metadata protocol client
//!
//! The cache does not verify metadata signatures itself. A [`MetadataClient`]
//! performs the full root → timestamp → snapshot → targets update, including
//! delegated targets roles, and stores each verified role document in a
//! [`MetadataStage`]. The sync engine promotes the stage into the cache only
//! once the refresh has completed. The client also fetches target content on
//! request.
//!
//! Implementations classify their failures: transport problems as
//! [`Error::Network`], rejected documents as [`Error::UntrustedMetadata`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::cache::MetadataStage;
use crate::metadata::TargetRecord;
use crate::Result;

/// Boxed future returned by [`MetadataClient`] operations
pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A verifying client for the trust metadata repository
pub trait MetadataClient: Send + Sync {
    /// Run a verified metadata update
    ///
    /// The stage starts with the currently cached documents, including
    /// `root.json`. On success it holds the verified `timestamp.json`,
    /// `targets.json` and one `<role>.json` per delegated targets role. A
    /// failed or cancelled refresh is discarded with its stage.
    fn refresh<'a>(&'a self, stage: &'a MetadataStage) -> ClientFuture<'a, ()>;

    /// Fetch the content of a target described by verified metadata
    ///
    /// The caller verifies the returned bytes against `record`.
    fn download_target<'a>(&'a self, record: &'a TargetRecord) -> ClientFuture<'a, Vec<u8>>;
}

impl<T: MetadataClient + ?Sized> MetadataClient for Arc<T> {
    fn refresh<'a>(&'a self, stage: &'a MetadataStage) -> ClientFuture<'a, ()> {
        (**self).refresh(stage)
    }

    fn download_target<'a>(&'a self, record: &'a TargetRecord) -> ClientFuture<'a, Vec<u8>> {
        (**self).download_target(record)
    }
}

impl MetadataClient for Box<dyn MetadataClient> {
    fn refresh<'a>(&'a self, stage: &'a MetadataStage) -> ClientFuture<'a, ()> {
        (**self).refresh(stage)
    }

    fn download_target<'a>(&'a self, record: &'a TargetRecord) -> ClientFuture<'a, Vec<u8>> {
        (**self).download_target(record)
    }
}
