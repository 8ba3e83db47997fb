//! Layered application settings: defaults, then a TOML file, then
//! `TEMPMAP__SECTION__KEY` environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use validator::Validate;

use crate::error::{ProcessingError, Result};
use crate::interpolation::{GridShape, ModelParams, RegressionModel, VariogramModel};
use crate::readers::sql_store::check_table_name;
use crate::spatial::Crs;
use crate::utils::constants::{
    CRS_WEB_MERCATOR, DEFAULT_HALF_RANGE, DEFAULT_IMAGES_DIR, DEFAULT_LOG_BACKUPS, DEFAULT_LOG_MAX_BYTES,
    DEFAULT_MEDIAN_OFFSET, DEFAULT_NLAGS, DEFAULT_N_LEVELS, DEFAULT_REGRESSION_MODEL, DEFAULT_VARIOGRAM_MODEL,
    DEFAULT_X_POINTS, DEFAULT_Y_POINTS,
};
use crate::writers::{default_color_stops, Colormap};

pub const ENV_PREFIX: &str = "TEMPMAP";
pub const ENV_SEPARATOR: &str = "__";
pub const DEFAULT_CONFIG_PATH: &str = "configs/tempmap.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AppConfig {
    #[validate(nested)]
    pub paths: PathsConfig,
    #[validate(nested)]
    pub influx: InfluxConfig,
    #[validate(nested)]
    pub metadata: MetadataConfig,
    #[validate(nested)]
    pub grid: GridConfig,
    #[validate(nested)]
    pub interpolation: InterpolationConfig,
    #[validate(nested)]
    pub visualization: VisualizationConfig,
    #[validate(nested)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PathsConfig {
    /// GeoJSON boundary of the mapped region.
    pub country_file: PathBuf,
    /// Single-band elevation GeoTIFF.
    pub dem_tif: PathBuf,
    pub images_dir: PathBuf,
    /// Station metadata CSV, used when `metadata.database_url` is unset.
    pub stations_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            country_file: PathBuf::from("data/country.geojson"),
            dem_tif: PathBuf::from("data/dem.tif"),
            images_dir: PathBuf::from(DEFAULT_IMAGES_DIR),
            stations_file: PathBuf::from("data/stations.csv"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct InfluxConfig {
    #[validate(url)]
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
    /// One measurement name or a comma separated list.
    #[serde(alias = "measurements")]
    #[validate(length(min = 1))]
    pub measurement: String,
    /// Flux duration of the aggregation window.
    #[validate(length(min = 2))]
    pub window: String,
    #[validate(range(min = 1, max = 600))]
    pub timeout_secs: u64,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086".to_string(),
            token: String::new(),
            org: String::new(),
            bucket: String::new(),
            measurement: "temperature".to_string(),
            window: "1h".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MetadataConfig {
    /// Station database, e.g. `mysql://user:pw@host:3306/db`. When unset the
    /// CSV at `paths.stations_file` is read instead.
    pub database_url: Option<String>,
    #[validate(length(min = 1))]
    pub table: String,
    #[validate(range(min = 1, max = 64))]
    pub max_connections: u32,
    /// Field separator of the stations CSV.
    pub csv_delimiter: String,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            table: "chmi_metadata.weather_stations".to_string(),
            max_connections: 2,
            csv_delimiter: ",".to_string(),
        }
    }
}

impl MetadataConfig {
    pub fn csv_delimiter_byte(&self) -> Result<u8> {
        match self.csv_delimiter.as_bytes() {
            [byte] => Ok(*byte),
            _ => Err(ProcessingError::InvalidConfig(format!(
                "metadata.csv_delimiter must be a single ASCII character, got '{}'",
                self.csv_delimiter
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GridConfig {
    #[validate(range(min = 2, max = 5000))]
    pub x_points: usize,
    #[validate(range(min = 2, max = 5000))]
    pub y_points: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            x_points: DEFAULT_X_POINTS,
            y_points: DEFAULT_Y_POINTS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct InterpolationConfig {
    pub variogram_model: String,
    #[validate(range(min = 1, max = 1000))]
    pub nlags: usize,
    pub regression_model: String,
    /// CRS the station coordinates are projected into before interpolation.
    pub working_crs: String,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            variogram_model: DEFAULT_VARIOGRAM_MODEL.to_string(),
            nlags: DEFAULT_NLAGS,
            regression_model: DEFAULT_REGRESSION_MODEL.to_string(),
            working_crs: CRS_WEB_MERCATOR.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct VisualizationConfig {
    #[validate(range(min = 2, max = 256))]
    pub n_levels: usize,
    /// `[position, "#rrggbb"]` stops from 0 to 1.
    pub colormap: Vec<(f64, String)>,
    pub show_boundary: bool,
    #[validate(range(min = 1, max = 100))]
    pub half_range: i32,
    pub median_offset: f64,
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        Self {
            n_levels: DEFAULT_N_LEVELS,
            colormap: default_color_stops(),
            show_boundary: false,
            half_range: DEFAULT_HALF_RANGE,
            median_offset: DEFAULT_MEDIAN_OFFSET,
        }
    }
}

impl VisualizationConfig {
    pub fn build_colormap(&self) -> Result<Colormap> {
        if self.colormap.is_empty() {
            Colormap::default_with_levels(self.n_levels)
        } else {
            Colormap::from_stops(&self.colormap, self.n_levels)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggingConfig {
    #[validate(length(min = 1))]
    pub level: String,
    pub file: Option<PathBuf>,
    /// Size at which the log file is rotated.
    #[validate(range(min = 1024))]
    pub max_bytes: u64,
    /// Rotated files kept next to the live one.
    #[validate(range(min = 1, max = 100))]
    pub backups: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_bytes: DEFAULT_LOG_MAX_BYTES,
            backups: DEFAULT_LOG_BACKUPS,
        }
    }
}

impl AppConfig {
    /// Load and validate. A missing file is fine when `path` is the default;
    /// an explicitly given file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };
        if required && !path.exists() {
            return Err(ProcessingError::InvalidConfig(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_path()).required(required))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;

        let app: AppConfig = settings.try_deserialize()?;
        app.validate()?;
        debug!(path = %path.display(), "Configuration loaded");
        Ok(app)
    }

    /// Parse a TOML document, without file or environment layers.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?;
        let app: AppConfig = settings.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    /// Field ranges plus every identifier the pipeline will parse later.
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self)?;
        self.interpolation.variogram_model.parse::<VariogramModel>()?;
        self.interpolation.regression_model.parse::<RegressionModel>()?;
        self.working_crs()?;
        self.visualization.build_colormap()?;
        self.metadata.csv_delimiter_byte()?;
        check_table_name(&self.metadata.table)?;
        Ok(())
    }

    pub fn working_crs(&self) -> Result<Crs> {
        self.interpolation.working_crs.parse()
    }

    pub fn grid_shape(&self) -> GridShape {
        GridShape {
            x_points: self.grid.x_points,
            y_points: self.grid.y_points,
        }
    }

    pub fn model_params(&self) -> ModelParams {
        ModelParams {
            regression_model: self.interpolation.regression_model.clone(),
            variogram_model: self.interpolation.variogram_model.clone(),
            nlags: self.interpolation.nlags,
        }
    }
}
