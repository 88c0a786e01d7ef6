//! Decide whether the cache must be refreshed over the network
//!
//! The decision is a function of the cached timestamp role and the current
//! time only; it never touches the network and never fails.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::cache::{LocalCache, TIMESTAMP_FILE};
use crate::metadata::{Signed, TimestampRole};

/// Whether `cache` needs a refresh now
pub fn needs_refresh(cache: &LocalCache) -> bool {
    needs_refresh_at(cache, Utc::now())
}

/// Whether `cache` needs a refresh at `now`
///
/// True when no timestamp has been cached, when the cached timestamp cannot
/// be read or parsed, or when it expires at or before `now`.
pub fn needs_refresh_at(cache: &LocalCache, now: DateTime<Utc>) -> bool {
    let data = match cache.read_metadata(TIMESTAMP_FILE) {
        Ok(Some(data)) => data,
        Ok(None) => {
            debug!("no cached timestamp, refresh required");
            return true;
        }
        Err(e) => {
            warn!(error = %e, "cannot read cached timestamp, refresh required");
            return true;
        }
    };

    match serde_json::from_slice::<Signed<TimestampRole>>(&data) {
        Ok(timestamp) if timestamp.signed.is_expired_at(now) => {
            debug!(expires = %timestamp.signed.expires, "cached timestamp expired");
            true
        }
        Ok(_) => false,
        Err(e) => {
            warn!(error = %e, "unparseable cached timestamp, refresh required");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn timestamp_doc(expires: DateTime<Utc>) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "signed": {
                "_type": "timestamp",
                "version": 1,
                "expires": expires.to_rfc3339(),
                "meta": {}
            },
            "signatures": []
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_needs_refresh_without_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::open(dir.path());
        assert!(needs_refresh(&cache));
    }

    #[tokio::test]
    async fn test_staleness_follows_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::open(dir.path());
        let expires = Utc::now() + Duration::hours(1);
        cache
            .write_metadata(TIMESTAMP_FILE, &timestamp_doc(expires))
            .await
            .unwrap();

        assert!(!needs_refresh(&cache));
        assert!(!needs_refresh_at(&cache, expires - Duration::seconds(1)));
        assert!(needs_refresh_at(&cache, expires));
        assert!(needs_refresh_at(&cache, expires + Duration::days(1)));
    }

    #[tokio::test]
    async fn test_corrupt_timestamp_needs_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::open(dir.path());
        cache
            .write_metadata(TIMESTAMP_FILE, b"{\"signed\": ")
            .await
            .unwrap();
        assert!(needs_refresh(&cache));
    }
}
