use std::time::Duration;

use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

use crate::geo::normalize_address;
use crate::models::order::GeoPoint;

#[derive(Debug, Deserialize)]
struct GeocodeRow {
    lat: String,
    lon: String,
}

/// Rate-limited, cached client for the external geocoding collaborator.
///
/// `resolve` never fails the caller: lookup errors and not-found results
/// both come back as `None` and the distance estimator falls back to the
/// address-token heuristic.
pub struct Geocoder {
    client: reqwest::Client,
    base_url: Option<String>,
    cache: DashMap<String, Option<GeoPoint>>,
    min_interval: Duration,
    next_call_at: Mutex<Instant>,
}

impl Geocoder {
    pub fn new(base_url: Option<String>, min_interval: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            cache: DashMap::new(),
            min_interval,
            next_call_at: Mutex::new(Instant::now()),
        }
    }

    /// Client with no backend; every lookup is a miss. Used in tests and
    /// when GEOCODER_URL is unset.
    pub fn disabled() -> Self {
        Self::new(None, Duration::from_secs(1))
    }

    pub async fn resolve(&self, address: &str) -> Option<GeoPoint> {
        let key = normalize_address(address);
        if key.is_empty() {
            return None;
        }

        if let Some(cached) = self.cache.get(&key) {
            debug!(address = %key, "geocode cache hit");
            return *cached;
        }

        let resolved = match self.lookup(&key).await {
            Ok(point) => point,
            Err(err) => {
                warn!(address = %key, error = %err, "geocode lookup failed");
                None
            }
        };

        self.cache.insert(key, resolved);
        resolved
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    async fn lookup(&self, query: &str) -> Result<Option<GeoPoint>, reqwest::Error> {
        let Some(base_url) = &self.base_url else {
            return Ok(None);
        };

        self.throttle().await;

        let rows: Vec<GeocodeRow> = self
            .client
            .get(base_url)
            .query(&[("q", query), ("format", "json"), ("limit", "1")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Some(row) = rows.first() else {
            return Ok(None);
        };

        match (row.lat.parse::<f64>(), row.lon.parse::<f64>()) {
            (Ok(lat), Ok(lng)) => Ok(Some(GeoPoint { lat, lng })),
            _ => {
                warn!(address = %query, "geocoder returned unparseable coordinates");
                Ok(None)
            }
        }
    }

    /// External calls must keep at least `min_interval` between them.
    async fn throttle(&self) {
        let mut next_call_at = self.next_call_at.lock().await;
        let now = Instant::now();
        if *next_call_at > now {
            sleep_until(*next_call_at).await;
        }
        *next_call_at = Instant::now() + self.min_interval;
    }
}

#[cfg(test)]
mod tests {
    use super::Geocoder;

    #[tokio::test]
    async fn disabled_geocoder_resolves_nothing_and_caches_the_miss() {
        let geocoder = Geocoder::disabled();

        assert!(geocoder.resolve("Fredericksburg, VA").await.is_none());
        assert_eq!(geocoder.cache_len(), 1);

        // Repeat lookup is served from cache, no second entry.
        assert!(geocoder.resolve("  fredericksburg,  VA ").await.is_none());
        assert_eq!(geocoder.cache_len(), 1);
    }

    #[tokio::test]
    async fn blank_addresses_are_not_cached() {
        let geocoder = Geocoder::disabled();
        assert!(geocoder.resolve("   ").await.is_none());
        assert_eq!(geocoder.cache_len(), 0);
    }
}
