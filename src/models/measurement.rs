use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::StationMetadata;

/// A raw reading as returned by a measurement source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub timestamp: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub station_id: Option<String>,
}

impl MeasurementRecord {
    pub fn new(timestamp: DateTime<Utc>, temperature: Option<f64>, station_id: Option<String>) -> Self {
        Self {
            timestamp,
            temperature: temperature.filter(|t| t.is_finite()),
            station_id,
        }
    }
}

/// A reading joined with its station metadata and projected into the working CRS.
///
/// Only complete records exist: a reading without temperature, station id or
/// metadata never becomes an `EnrichedRecord`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub station_id: String,
    pub longitude: f64,
    pub latitude: f64,
    pub elevation: Option<f64>,
    /// Easting in the working CRS; equals longitude until projected.
    pub x: f64,
    /// Northing in the working CRS; equals latitude until projected.
    pub y: f64,
}

impl EnrichedRecord {
    pub fn from_parts(
        timestamp: DateTime<Utc>,
        temperature: f64,
        station: &StationMetadata,
    ) -> Self {
        Self {
            timestamp,
            temperature,
            station_id: station.station_id.clone(),
            longitude: station.longitude,
            latitude: station.latitude,
            elevation: station.elevation,
            x: station.longitude,
            y: station.latitude,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.temperature.is_finite() && self.x.is_finite() && self.y.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_non_finite_temperature_is_missing() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap();
        let record = MeasurementRecord::new(t, Some(f64::NAN), Some("1".to_string()));
        assert_eq!(record.temperature, None);
    }

    #[test]
    fn test_enriched_from_parts() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap();
        let station = StationMetadata::new("A".to_string(), 14.5, 50.1, Some(300.0));
        let record = EnrichedRecord::from_parts(t, 12.5, &station);
        assert_eq!(record.x, 14.5);
        assert_eq!(record.y, 50.1);
        assert!(record.is_usable());
    }
}
