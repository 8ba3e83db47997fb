pub mod grid;
pub mod measurement;
pub mod station;
pub mod window;

pub use grid::{InterpolationGrid, RenderedMap};
pub use measurement::{EnrichedRecord, MeasurementRecord};
pub use station::{StationMetadata, StationMetadataRow};
pub use window::ProcessingWindow;
