//! Persistent matrix cache keyed by an order-independent fingerprint of the
//! location set.
//!
//! Two tiers: an optional bounded in-memory map for hot lookups, and the
//! durable store row. Writes always hit the durable tier; reads try memory
//! first and fall through silently on any memory-tier miss.

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

use crate::distance::matrix::DistanceMatrix;
use crate::domain::Location;
use crate::store::{DistanceCacheRecord, Store};

pub const DEFAULT_TTL_HOURS: i64 = 24;
const MEMORY_TIER_CAPACITY: usize = 64;

/// SHA-256 over the JSON of the sorted `(lat, lon)` pairs. Sorting makes the
/// key invariant under input permutation.
pub fn fingerprint(locations: &[Location]) -> String {
    let mut pairs: Vec<(f64, f64)> = locations
        .iter()
        .map(|l| (l.latitude, l.longitude))
        .collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));

    // Coordinates are finite by Location's construction, so this never fails.
    let json = serde_json::to_string(&pairs).unwrap_or_default();

    let digest = Sha256::digest(json.as_bytes());
    hex::encode(digest)
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatistics {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub cache_hit_potential: f64,
}

struct MemoryEntry {
    matrix: DistanceMatrix,
    expires_at: DateTime<Utc>,
}

pub struct MatrixCache {
    store: Arc<Store>,
    memory: Option<Mutex<HashMap<String, MemoryEntry>>>,
    ttl_hours: i64,
}

impl MatrixCache {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            memory: Some(Mutex::new(HashMap::new())),
            ttl_hours: DEFAULT_TTL_HOURS,
        }
    }

    /// Durable tier only.
    pub fn without_memory_tier(store: Arc<Store>) -> Self {
        Self {
            store,
            memory: None,
            ttl_hours: DEFAULT_TTL_HOURS,
        }
    }

    /// Returns the cached matrix for this location set if unexpired.
    pub fn get(&self, locations: &[Location]) -> Option<DistanceMatrix> {
        let key = fingerprint(locations);
        let now = Utc::now();

        if let Some(memory) = &self.memory {
            let guard = memory.lock();
            if let Some(entry) = guard.get(&key) {
                if entry.expires_at > now {
                    return Some(entry.matrix.clone());
                }
            }
        }

        let record = self.store.cache_get(&key)?;
        if record.expires_at <= now {
            return None;
        }

        let matrix = DistanceMatrix::new(
            locations.to_vec(),
            record.distances_meters,
            record.durations_seconds,
            record.provider,
        )
        .ok()?;

        if let Some(memory) = &self.memory {
            let mut guard = memory.lock();
            evict_if_full(&mut guard, now);
            guard.insert(
                key,
                MemoryEntry {
                    matrix: matrix.clone(),
                    expires_at: record.expires_at,
                },
            );
        }

        Some(matrix)
    }

    /// Upserts the matrix with the given TTL (default 24h).
    pub fn set(&self, matrix: &DistanceMatrix, ttl_hours: Option<i64>) {
        let key = fingerprint(&matrix.locations);
        let ttl = ttl_hours.unwrap_or(self.ttl_hours);
        let now = Utc::now();
        let expires_at = now + TimeDelta::hours(ttl);

        if let Some(memory) = &self.memory {
            let mut guard = memory.lock();
            evict_if_full(&mut guard, now);
            guard.insert(
                key.clone(),
                MemoryEntry {
                    matrix: matrix.clone(),
                    expires_at,
                },
            );
        }

        self.store.cache_put(DistanceCacheRecord {
            cache_key: key,
            distances_meters: matrix.distances_meters.clone(),
            durations_seconds: matrix.durations_seconds.clone(),
            provider: matrix.provider.clone(),
            expires_at,
            updated_at: now,
        });
    }

    pub fn invalidate(&self, locations: &[Location]) {
        let key = fingerprint(locations);
        if let Some(memory) = &self.memory {
            memory.lock().remove(&key);
        }
        self.store.cache_delete(&key);
    }

    /// Housekeeping: drops expired durable rows, returns how many.
    pub fn clear_expired(&self) -> usize {
        let now = Utc::now();
        if let Some(memory) = &self.memory {
            memory.lock().retain(|_, e| e.expires_at > now);
        }
        self.store.cache_delete_expired(now)
    }

    pub fn statistics(&self) -> CacheStatistics {
        let now = Utc::now();
        let entries = self.store.cache_entries();
        let total = entries.len();
        let valid = entries.iter().filter(|e| e.expires_at > now).count();
        CacheStatistics {
            total_entries: total,
            valid_entries: valid,
            expired_entries: total - valid,
            cache_hit_potential: valid as f64 / total.max(1) as f64,
        }
    }
}

fn evict_if_full(map: &mut HashMap<String, MemoryEntry>, now: DateTime<Utc>) {
    if map.len() < MEMORY_TIER_CAPACITY {
        return;
    }
    map.retain(|_, e| e.expires_at > now);
    if map.len() >= MEMORY_TIER_CAPACITY {
        // Still full of live entries; drop the one closest to expiry.
        if let Some(key) = map
            .iter()
            .min_by_key(|(_, e)| e.expires_at)
            .map(|(k, _)| k.clone())
        {
            map.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(lat: f64, lon: f64) -> Location {
        Location::new(lat, lon).unwrap()
    }

    fn sample_matrix(locations: Vec<Location>) -> DistanceMatrix {
        let n = locations.len();
        let distances = vec![vec![0.0; n]; n];
        let durations = vec![vec![0.0; n]; n];
        DistanceMatrix::new(locations, distances, durations, "geodesic").unwrap()
    }

    #[test]
    fn fingerprint_is_order_independent() {
        let a = loc(-33.44, -70.66);
        let b = loc(-33.02, -71.55);
        let c = loc(-33.45, -70.60);
        assert_eq!(fingerprint(&[a, b, c]), fingerprint(&[c, a, b]));
        assert_eq!(fingerprint(&[a, b]), fingerprint(&[b, a]));
        assert_ne!(fingerprint(&[a, b]), fingerprint(&[a, c]));
    }

    #[test]
    fn set_then_get_round_trips() {
        let cache = MatrixCache::new(Arc::new(Store::new()));
        let locations = vec![loc(-33.44, -70.66), loc(-33.02, -71.55)];
        assert!(cache.get(&locations).is_none());

        cache.set(&sample_matrix(locations.clone()), None);

        let hit = cache.get(&locations).expect("cache hit");
        assert_eq!(hit.provider, "geodesic");

        // Same set in a different order hits the same key.
        let permuted = vec![locations[1], locations[0]];
        assert!(cache.get(&permuted).is_some());
    }

    #[test]
    fn expired_entries_are_not_returned() {
        let cache = MatrixCache::new(Arc::new(Store::new()));
        let locations = vec![loc(-33.44, -70.66), loc(-33.02, -71.55)];
        cache.set(&sample_matrix(locations.clone()), Some(-1));
        assert!(cache.get(&locations).is_none());

        let stats = cache.statistics();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.expired_entries, 1);
        assert_eq!(cache.clear_expired(), 1);
        assert_eq!(cache.statistics().total_entries, 0);
    }

    #[test]
    fn invalidate_removes_both_tiers() {
        let cache = MatrixCache::new(Arc::new(Store::new()));
        let locations = vec![loc(-33.44, -70.66), loc(-33.02, -71.55)];
        cache.set(&sample_matrix(locations.clone()), None);
        cache.invalidate(&locations);
        assert!(cache.get(&locations).is_none());
    }

    #[test]
    fn durable_tier_survives_without_memory() {
        let store = Arc::new(Store::new());
        let writer = MatrixCache::new(Arc::clone(&store));
        let locations = vec![loc(-33.44, -70.66), loc(-33.02, -71.55)];
        writer.set(&sample_matrix(locations.clone()), None);

        let reader = MatrixCache::without_memory_tier(store);
        assert!(reader.get(&locations).is_some());
    }
}
