pub mod data_processor;
pub mod metadata_cache;
pub mod record_enricher;

pub use data_processor::{
    DataProcessor, HourOutcome, HourProcessor, PipelineSettings, RangeSummary, SkipReason,
};
pub use metadata_cache::{CacheStats, MetadataCache};
pub use record_enricher::{EnrichmentStats, RecordEnricher};
