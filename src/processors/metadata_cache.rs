use std::collections::{BTreeSet, HashMap};
use std::time::Instant;
use tracing::{debug, warn};

use crate::models::StationMetadata;
use crate::readers::MetadataStore;

/// Counters for one `resolve` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub fetched: usize,
}

/// Process-wide memo of station metadata.
///
/// Entries are never evicted: station coordinates do not change while the
/// process runs. Only ids the store actually resolved are cached, so an id
/// that is missing or unparseable today is asked for again on the next call.
pub struct MetadataCache {
    store: Box<dyn MetadataStore>,
    entries: HashMap<String, StationMetadata>,
    bulk_fetches: usize,
}

impl MetadataCache {
    pub fn new(store: Box<dyn MetadataStore>) -> Self {
        Self {
            store,
            entries: HashMap::new(),
            bulk_fetches: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, station_id: &str) -> bool {
        self.entries.contains_key(station_id)
    }

    /// Number of store round-trips made so far.
    pub fn bulk_fetch_count(&self) -> usize {
        self.bulk_fetches
    }

    /// Metadata for every id that can be resolved.
    ///
    /// Cache misses are fetched in a single bulk request. A failed request is
    /// logged and only the cached part of the answer is returned.
    pub async fn resolve<I, S>(&mut self, ids: I) -> (HashMap<String, StationMetadata>, CacheStats)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let started = Instant::now();
        let requested: BTreeSet<String> = ids
            .into_iter()
            .map(|id| id.as_ref().trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();

        let misses: Vec<String> = requested
            .iter()
            .filter(|id| !self.entries.contains_key(*id))
            .cloned()
            .collect();
        let mut stats = CacheStats {
            hits: requested.len() - misses.len(),
            misses: misses.len(),
            fetched: 0,
        };

        if !misses.is_empty() {
            self.bulk_fetches += 1;
            match self.store.bulk_fetch(&misses).await {
                Ok(rows) => {
                    for station in rows.iter().filter_map(StationMetadata::from_row) {
                        if misses.contains(&station.station_id) {
                            self.entries.insert(station.station_id.clone(), station);
                            stats.fetched += 1;
                        }
                    }
                }
                Err(e) => warn!(missing = misses.len(), error = %e, "Station metadata fetch failed"),
            }
        }

        let mut resolved = HashMap::with_capacity(requested.len());
        let mut unresolved = Vec::new();
        for id in requested {
            match self.entries.get(&id) {
                Some(station) => {
                    resolved.insert(id, station.clone());
                }
                None => unresolved.push(id),
            }
        }

        if !unresolved.is_empty() {
            warn!(count = unresolved.len(), ids = ?unresolved, "Stations without usable metadata");
        }
        debug!(
            cache_hit = stats.hits,
            fetched = stats.fetched,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Resolved station metadata"
        );

        (resolved, stats)
    }
}
