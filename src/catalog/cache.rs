use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::digest::{CatalogDigest, DigestLimits};
use super::source::CatalogSource;

struct CachedDigest {
    digest: Arc<CatalogDigest>,
    refreshed_at: Instant,
    expires_at: Instant,
}

/// Freshness report for the health endpoint.
#[derive(Debug, Serialize)]
pub struct DigestCacheStatus {
    pub cached: bool,
    pub fresh: bool,
    pub sections: usize,
    pub items: usize,
    pub age_secs: Option<u64>,
}

/// Read-through catalog cache with a fixed TTL.
///
/// `get_digest` never fails: a primary-source failure falls back to the local
/// copy, and a double failure yields an empty digest so the pipeline always
/// has something to validate against.
pub struct DigestCache {
    primary: Option<Box<dyn CatalogSource>>,
    fallback: Box<dyn CatalogSource>,
    limits: DigestLimits,
    ttl: Duration,
    slot: RwLock<Option<CachedDigest>>,
}

impl DigestCache {
    pub fn new(
        primary: Option<Box<dyn CatalogSource>>,
        fallback: Box<dyn CatalogSource>,
        limits: DigestLimits,
        ttl: Duration,
    ) -> Self {
        Self {
            primary,
            fallback,
            limits,
            ttl,
            slot: RwLock::new(None),
        }
    }

    /// Returns the cached digest when it is younger than the TTL; otherwise
    /// reloads from the primary source, then the fallback, then settles for
    /// an empty digest.
    pub async fn get_digest(&self) -> Arc<CatalogDigest> {
        if let Some(digest) = self.cached_if_fresh() {
            return digest;
        }

        let manifest = match &self.primary {
            Some(primary) => match primary.fetch().await {
                Ok(manifest) => Some(manifest),
                Err(err) => {
                    warn!("primary catalog source failed, trying fallback: {}", err);
                    None
                }
            },
            None => None,
        };

        let manifest = match manifest {
            Some(m) => Some(m),
            None => match self.fallback.fetch().await {
                Ok(m) => Some(m),
                Err(err) => {
                    warn!("fallback catalog source failed: {}", err);
                    None
                }
            },
        };

        let digest = Arc::new(match manifest {
            Some(manifest) => CatalogDigest::from_manifest(&manifest, self.limits),
            None => CatalogDigest::default(),
        });

        debug!(
            sections = digest.sections.len(),
            items = digest.item_count(),
            "catalog digest refreshed"
        );

        let now = Instant::now();
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(CachedDigest {
            digest: digest.clone(),
            refreshed_at: now,
            expires_at: now + self.ttl,
        });
        digest
    }

    fn cached_if_fresh(&self) -> Option<Arc<CatalogDigest>> {
        let slot = self.slot.read().unwrap_or_else(|e| e.into_inner());
        slot.as_ref()
            .filter(|cached| cached.expires_at > Instant::now())
            .map(|cached| cached.digest.clone())
    }

    pub fn status(&self) -> DigestCacheStatus {
        let slot = self.slot.read().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some(cached) => DigestCacheStatus {
                cached: true,
                fresh: cached.expires_at > Instant::now(),
                sections: cached.digest.sections.len(),
                items: cached.digest.item_count(),
                age_secs: Some(cached.refreshed_at.elapsed().as_secs()),
            },
            None => DigestCacheStatus {
                cached: false,
                fresh: false,
                sections: 0,
                items: 0,
                age_secs: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::manifest::{CatalogItem, Manifest, ManifestSection};
    use crate::errors::ServiceError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl CatalogSource for CountingSource {
        async fn fetch(&self) -> Result<Manifest, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ServiceError::ExternalServiceError("boom".into()));
            }
            let mut manifest = Manifest::default();
            manifest.sections.insert(
                "ice_cream".into(),
                ManifestSection {
                    en: "Ice Cream".into(),
                    items: vec![CatalogItem {
                        id: "pistachio".into(),
                        ar_name: "فستق حلبي".into(),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
            );
            Ok(manifest)
        }
    }

    fn cache_with(
        primary_fail: bool,
        fallback_fail: bool,
        ttl: Duration,
    ) -> (DigestCache, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let primary_calls = Arc::new(AtomicUsize::new(0));
        let fallback_calls = Arc::new(AtomicUsize::new(0));
        let cache = DigestCache::new(
            Some(Box::new(CountingSource {
                calls: primary_calls.clone(),
                fail: primary_fail,
            })),
            Box::new(CountingSource {
                calls: fallback_calls.clone(),
                fail: fallback_fail,
            }),
            DigestLimits::default(),
            ttl,
        );
        (cache, primary_calls, fallback_calls)
    }

    #[tokio::test]
    async fn second_read_within_ttl_hits_cache() {
        let (cache, primary_calls, _) = cache_with(false, false, Duration::from_secs(300));

        let first = cache.get_digest().await;
        let second = cache.get_digest().await;

        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
        assert!(!first.is_empty());
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn expired_entry_triggers_fresh_read() {
        let (cache, primary_calls, _) = cache_with(false, false, Duration::from_millis(10));

        cache.get_digest().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.get_digest().await;

        assert_eq!(primary_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn primary_failure_falls_back_to_local() {
        let (cache, primary_calls, fallback_calls) =
            cache_with(true, false, Duration::from_secs(300));

        let digest = cache.get_digest().await;

        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
        assert!(digest.lookup("ice_cream", "pistachio").is_some());
    }

    #[tokio::test]
    async fn double_failure_yields_empty_digest() {
        let (cache, _, _) = cache_with(true, true, Duration::from_secs(300));

        let digest = cache.get_digest().await;
        assert!(digest.is_empty());

        // Even the empty digest is cached for the TTL window.
        let status = cache.status();
        assert!(status.cached);
        assert_eq!(status.items, 0);
    }
}
