use crate::core::cache::KeyValueCollection;
use crate::core::currency::{CurrencyRateProvider, ExchangeRateProvider, normalize_code};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const RATE_TTL: Duration = Duration::from_secs(6 * 60 * 60);

fn rate_key(from: &str, to: &str) -> String {
    format!("exchange_rate:{from}:{to}")
}

/// Cache-aside lookup of currency pair rates in front of a single upstream provider.
///
/// Entries live for a fixed window and are never served past expiry. Concurrent misses
/// for the same pair may each reach the provider; the last write wins.
pub struct RateCache {
    provider: Arc<dyn ExchangeRateProvider>,
    cache: Arc<dyn KeyValueCollection>,
    ttl: Duration,
}

impl RateCache {
    pub fn new(provider: Arc<dyn ExchangeRateProvider>, cache: Arc<dyn KeyValueCollection>) -> Self {
        Self::with_ttl(provider, cache, RATE_TTL)
    }

    pub fn with_ttl(
        provider: Arc<dyn ExchangeRateProvider>,
        cache: Arc<dyn KeyValueCollection>,
        ttl: Duration,
    ) -> Self {
        Self {
            provider,
            cache,
            ttl,
        }
    }

    async fn cached_rate(&self, key: &str) -> Option<f64> {
        match self.cache.get(key.as_bytes()).await {
            Ok(Some(raw)) => match serde_json::from_slice::<f64>(&raw) {
                Ok(rate) => {
                    debug!("Cache hit for currency rate: {}", key);
                    Some(rate)
                }
                Err(e) => {
                    debug!("Discarding undecodable rate for {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Rate cache lookup failed for {}: {:#}", key, e);
                None
            }
        }
    }
}

#[async_trait]
impl CurrencyRateProvider for RateCache {
    async fn get_rate(&self, from: &str, to: &str) -> Result<f64> {
        let from = normalize_code(from);
        let to = normalize_code(to);
        if from == to {
            return Ok(1.0);
        }

        let key = rate_key(&from, &to);
        if let Some(rate) = self.cached_rate(&key).await {
            return Ok(rate);
        }

        debug!("Cache miss for currency rate: {}", key);
        let rates = self
            .provider
            .fetch_rates(&from)
            .await
            .with_context(|| format!("Failed to fetch exchange rates for {from}"))?;
        let rate = rates
            .get(&to)
            .copied()
            .ok_or_else(|| anyhow!("Currency code {} not found in rates for {}", to, from))?;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(anyhow!("Invalid rate {} for {} to {}", rate, from, to));
        }

        if let Err(e) = self
            .cache
            .put(key.as_bytes(), &serde_json::to_vec(&rate)?, Some(self.ttl))
            .await
        {
            warn!("Failed to cache rate for {}: {:#}", key, e);
        }
        Ok(rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryCollection;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct MockRateSource {
        call_count: AtomicUsize,
        rates: Mutex<HashMap<String, HashMap<String, f64>>>,
    }

    impl MockRateSource {
        fn new() -> Self {
            Self {
                call_count: AtomicUsize::new(0),
                rates: Mutex::new(HashMap::new()),
            }
        }

        fn set_rate(&self, from: &str, to: &str, rate: f64) {
            self.rates
                .lock()
                .unwrap()
                .entry(from.to_string())
                .or_default()
                .insert(to.to_string(), rate);
        }

        fn calls(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ExchangeRateProvider for MockRateSource {
        async fn fetch_rates(&self, base: &str) -> Result<HashMap<String, f64>> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            self.rates
                .lock()
                .unwrap()
                .get(base)
                .cloned()
                .ok_or_else(|| anyhow!("Upstream unavailable for {}", base))
        }
    }

    fn rate_cache(source: &Arc<MockRateSource>, ttl: Duration) -> (RateCache, Arc<MemoryCollection>) {
        let collection = Arc::new(MemoryCollection::new());
        let cache = RateCache::with_ttl(source.clone(), collection.clone(), ttl);
        (cache, collection)
    }

    #[tokio::test]
    async fn test_same_currency_skips_cache_and_provider() {
        let source = Arc::new(MockRateSource::new());
        let (cache, collection) = rate_cache(&source, RATE_TTL);

        assert_eq!(cache.get_rate("usd", " USD").await.unwrap(), 1.0);
        assert_eq!(source.calls(), 0);
        assert!(collection.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rate_is_fetched_once_within_window() {
        let source = Arc::new(MockRateSource::new());
        source.set_rate("EUR", "USD", 1.1);
        let (cache, collection) = rate_cache(&source, RATE_TTL);

        // First call - should hit the provider
        assert_eq!(cache.get_rate("eur", "usd").await.unwrap(), 1.1);
        assert_eq!(source.calls(), 1);

        // Upstream drift is not observed while the entry is fresh
        source.set_rate("EUR", "USD", 1.2);
        assert_eq!(cache.get_rate("EUR", "USD").await.unwrap(), 1.1);
        assert_eq!(source.calls(), 1);

        assert!(
            collection
                .get(b"exchange_rate:EUR:USD")
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_expired_rate_is_refetched() {
        let source = Arc::new(MockRateSource::new());
        source.set_rate("EUR", "USD", 1.1);
        let (cache, _) = rate_cache(&source, Duration::from_millis(10));

        assert_eq!(cache.get_rate("EUR", "USD").await.unwrap(), 1.1);
        source.set_rate("EUR", "USD", 1.2);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get_rate("EUR", "USD").await.unwrap(), 1.2);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_provider_failure_is_surfaced_and_not_cached() {
        let source = Arc::new(MockRateSource::new());
        let (cache, collection) = rate_cache(&source, RATE_TTL);

        let err = cache.get_rate("GBP", "USD").await.unwrap_err();
        assert!(
            err.to_string()
                .contains("Failed to fetch exchange rates for GBP")
        );
        assert!(collection.entries().await.unwrap().is_empty());

        // Next call goes upstream again
        let _ = cache.get_rate("GBP", "USD").await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_missing_target_currency() {
        let source = Arc::new(MockRateSource::new());
        source.set_rate("EUR", "GBP", 0.85);
        let (cache, _) = rate_cache(&source, RATE_TTL);

        let err = cache.get_rate("EUR", "JPY").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Currency code JPY not found in rates for EUR"
        );
    }

    #[tokio::test]
    async fn test_undecodable_entry_counts_as_miss() {
        let source = Arc::new(MockRateSource::new());
        source.set_rate("EUR", "USD", 1.1);
        let (cache, collection) = rate_cache(&source, RATE_TTL);
        collection
            .put(b"exchange_rate:EUR:USD", b"not-a-number", None)
            .await
            .unwrap();

        assert_eq!(cache.get_rate("EUR", "USD").await.unwrap(), 1.1);
        assert_eq!(source.calls(), 1);
    }
}
