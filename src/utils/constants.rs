/// Hours of history processed by a first run.
pub const BACKFILL_HOURS: i64 = 7 * 24;

/// Minutes after an hour boundary before that hour's data is considered fully ingested.
pub const AVAILABILITY_LAG_MINUTES: i64 = 30;

/// Minimum number of usable measurements for a kriging fit.
pub const MIN_KRIGING_POINTS: usize = 3;

/// Default working CRS
pub const CRS_WEB_MERCATOR: &str = "EPSG:3857";

/// Grid defaults
pub const DEFAULT_X_POINTS: usize = 500;
pub const DEFAULT_Y_POINTS: usize = 500;

/// Interpolation defaults
pub const DEFAULT_VARIOGRAM_MODEL: &str = "spherical";
pub const DEFAULT_REGRESSION_MODEL: &str = "linear";
pub const DEFAULT_NLAGS: usize = 40;

/// Number of bins in the experimental semivariogram.
pub const VARIOGRAM_LAG_BINS: usize = 6;

/// Regression backbone constants
pub const FOREST_ESTIMATORS: usize = 100;
pub const BOOSTING_ESTIMATORS: usize = 100;
pub const BOOSTING_LEARNING_RATE: f64 = 0.1;
pub const BOOSTING_MAX_DEPTH: usize = 3;
pub const RANDOM_SEED: u64 = 42;
pub const SVR_C: f64 = 1.0;
pub const SVR_EPSILON: f64 = 0.1;

/// Visualization defaults
pub const DEFAULT_N_LEVELS: usize = 15;
pub const DEFAULT_HALF_RANGE: i32 = 7;
pub const DEFAULT_MEDIAN_OFFSET: f64 = 2.0;
pub const DEFAULT_IMAGES_DIR: &str = "output_web";

/// Hour label format used in artifact names
pub const HOUR_LABEL_FORMAT: &str = "%Y-%m-%d_%H%M";

/// Log rotation
pub const DEFAULT_LOG_MAX_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_LOG_BACKUPS: usize = 1;
