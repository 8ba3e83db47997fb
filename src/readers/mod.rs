pub mod measurement_source;
pub mod sql_store;
pub mod station_reader;

pub use measurement_source::{InfluxSource, MeasurementSource};
pub use sql_store::SqlMetadataStore;
pub use station_reader::{CsvMetadataStore, MetadataStore};
