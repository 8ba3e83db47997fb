use tracing::debug;

use crate::models::{EnrichedRecord, MeasurementRecord};
use crate::processors::MetadataCache;

/// What happened to the records of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentStats {
    pub input: usize,
    pub missing_temperature: usize,
    pub missing_station_id: usize,
    pub unresolved: usize,
    pub enriched: usize,
}

impl EnrichmentStats {
    pub fn dropped(&self) -> usize {
        self.input - self.enriched
    }
}

/// Joins raw readings with station metadata.
///
/// A reading is either fully enriched or dropped; there is no partial record.
pub struct RecordEnricher {
    cache: MetadataCache,
}

impl RecordEnricher {
    pub fn new(cache: MetadataCache) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    pub async fn enrich(&mut self, records: Vec<MeasurementRecord>) -> (Vec<EnrichedRecord>, EnrichmentStats) {
        let mut stats = EnrichmentStats {
            input: records.len(),
            ..Default::default()
        };

        let mut candidates = Vec::with_capacity(records.len());
        for record in records {
            match (record.temperature, record.station_id) {
                (None, _) => stats.missing_temperature += 1,
                (Some(_), None) => stats.missing_station_id += 1,
                (Some(temperature), Some(station_id)) => {
                    candidates.push((record.timestamp, temperature, station_id))
                }
            }
        }

        let (stations, _) = self
            .cache
            .resolve(candidates.iter().map(|(_, _, id)| id.as_str()))
            .await;

        let mut enriched = Vec::with_capacity(candidates.len());
        for (timestamp, temperature, station_id) in candidates {
            match stations.get(station_id.trim()) {
                Some(station) => enriched.push(EnrichedRecord::from_parts(timestamp, temperature, station)),
                None => stats.unresolved += 1,
            }
        }
        stats.enriched = enriched.len();

        debug!(
            input = stats.input,
            enriched = stats.enriched,
            missing_temperature = stats.missing_temperature,
            missing_station_id = stats.missing_station_id,
            unresolved = stats.unresolved,
            "Enriched measurement batch"
        );
        (enriched, stats)
    }
}
