pub mod constants;
pub mod filename;
pub mod logging;
pub mod numeric;
pub mod progress;
pub mod time;

pub use constants::*;
pub use filename::{hour_label, map_filename, map_path};
pub use numeric::{normalize_id, parse_numeric};
pub use logging::init_logging;
pub use progress::ProgressReporter;
