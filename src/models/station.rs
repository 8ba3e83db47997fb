use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::utils::{normalize_id, parse_numeric};

/// Resolved coordinates and elevation of one station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct StationMetadata {
    #[validate(length(min = 1))]
    pub station_id: String,

    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,

    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,

    /// Metres above sea level; `None` when the store has no usable value.
    pub elevation: Option<f64>,
}

/// A row as the metadata store returns it, before numeric parsing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StationMetadataRow {
    #[serde(alias = "gh_id", alias = "id")]
    pub station_id: String,
    #[serde(alias = "X", alias = "longitude")]
    pub lon: Option<String>,
    #[serde(alias = "Y", alias = "latitude")]
    pub lat: Option<String>,
    #[serde(default, alias = "elev", alias = "height")]
    pub elevation: Option<String>,
}

impl StationMetadata {
    pub fn new(station_id: String, longitude: f64, latitude: f64, elevation: Option<f64>) -> Self {
        Self {
            station_id,
            longitude,
            latitude,
            elevation,
        }
    }

    /// Parse a store row. Rows without a usable id or coordinates resolve to `None`;
    /// an unusable elevation only blanks the elevation.
    pub fn from_row(row: &StationMetadataRow) -> Option<Self> {
        let station_id = normalize_id(&row.station_id)?;
        let longitude = row.lon.as_deref().and_then(parse_numeric)?;
        let latitude = row.lat.as_deref().and_then(parse_numeric)?;
        let elevation = row.elevation.as_deref().and_then(parse_numeric);

        let station = Self::new(station_id, longitude, latitude, elevation);
        station.validate().ok()?;
        Some(station)
    }
}
