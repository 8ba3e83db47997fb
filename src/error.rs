use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProcessingError>;

#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown regression model type: {0}")]
    UnknownRegressionModel(String),

    #[error("Unknown variogram model: {0}")]
    UnknownVariogramModel(String),

    #[error("Unsupported CRS: {0}")]
    UnsupportedCrs(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Missing required data: {0}")]
    MissingData(String),

    #[error("Too few valid measurements for kriging: found {found}, need at least {required}")]
    InsufficientData { found: usize, required: usize },

    #[error("Interpolation error: {0}")]
    Interpolation(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Async task error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl ProcessingError {
    /// Errors that only concern the current hour's data, as opposed to faults
    /// in configuration or the environment.
    pub fn is_data_insufficiency(&self) -> bool {
        matches!(self, ProcessingError::InsufficientData { .. })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ProcessingError::Config(_)
                | ProcessingError::Validation(_)
                | ProcessingError::InvalidConfig(_)
                | ProcessingError::UnknownRegressionModel(_)
                | ProcessingError::UnknownVariogramModel(_)
                | ProcessingError::UnsupportedCrs(_)
        )
    }
}
