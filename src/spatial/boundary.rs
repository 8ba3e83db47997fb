//! Country boundary geometry and the grid mask built from it.

use std::fs;
use std::path::Path;

use geo::{BoundingRect, Contains, MultiPolygon, Point, Polygon, Rect};
use geo_types::Geometry;
use geojson::GeoJson;
use rayon::prelude::*;
use tracing::debug;

use crate::error::{ProcessingError, Result};
use crate::spatial::crs::Crs;

/// The region of interest: one or more polygons in their native CRS.
#[derive(Debug, Clone)]
pub struct Boundary {
    polygons: MultiPolygon<f64>,
    bounds: Rect<f64>,
    crs: Crs,
}

impl Boundary {
    pub fn new(polygons: Vec<Polygon<f64>>, crs: Crs) -> Result<Self> {
        let polygons = MultiPolygon::new(polygons);
        let bounds = polygons.bounding_rect().ok_or_else(|| {
            ProcessingError::MissingData("Boundary contains no polygon".to_string())
        })?;

        Ok(Self {
            polygons,
            bounds,
            crs,
        })
    }

    /// Load a GeoJSON FeatureCollection, Feature or bare geometry.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let boundary = Self::from_geojson_str(&text)?;
        debug!(
            path = %path.display(),
            polygons = boundary.polygons.0.len(),
            crs = %boundary.crs,
            "Loaded boundary"
        );
        Ok(boundary)
    }

    /// Polygons and MultiPolygons are kept, other geometries are ignored.
    /// The CRS comes from the legacy `crs` member and defaults to EPSG:4326.
    pub fn from_geojson_str(text: &str) -> Result<Self> {
        let raw: serde_json::Value = serde_json::from_str(text)?;
        let crs = match raw.pointer("/crs/properties/name").and_then(|v| v.as_str()) {
            Some(name) => name.parse::<Crs>()?,
            None => Crs::Wgs84,
        };

        let geojson = GeoJson::from_json_value(raw)?;
        let collection: geo_types::GeometryCollection<f64> = geojson::quick_collection(&geojson)?;

        let mut polygons = Vec::new();
        for geometry in collection {
            collect_polygons(geometry, &mut polygons);
        }

        Self::new(polygons, crs)
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn bounds(&self) -> Rect<f64> {
        self.bounds
    }

    pub fn polygons(&self) -> &MultiPolygon<f64> {
        &self.polygons
    }

    /// Strict interior test; points on the outline are outside.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        if !x.is_finite() || !y.is_finite() {
            return false;
        }
        let min = self.bounds.min();
        let max = self.bounds.max();
        if x < min.x || x > max.x || y < min.y || y > max.y {
            return false;
        }
        self.polygons.contains(&Point::new(x, y))
    }

    /// Mask of grid points inside the boundary, same layout as the inputs.
    pub fn build_mask(&self, grid_x: &[f64], grid_y: &[f64]) -> Vec<bool> {
        grid_x
            .par_iter()
            .zip(grid_y.par_iter())
            .map(|(x, y)| self.contains(*x, *y))
            .collect()
    }
}

fn collect_polygons(geometry: Geometry<f64>, out: &mut Vec<Polygon<f64>>) {
    match geometry {
        Geometry::Polygon(p) => out.push(p),
        Geometry::MultiPolygon(mp) => out.extend(mp.0),
        Geometry::GeometryCollection(gc) => {
            for g in gc {
                collect_polygons(g, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE_WITH_HOLE: &str = r#"{
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "properties": {"name": "test"},
            "geometry": {
                "type": "Polygon",
                "coordinates": [
                    [[12.0, 48.5], [19.0, 48.5], [19.0, 51.0], [12.0, 51.0], [12.0, 48.5]],
                    [[15.0, 49.5], [16.0, 49.5], [16.0, 50.0], [15.0, 50.0], [15.0, 49.5]]
                ]
            }
        }]
    }"#;

    #[test]
    fn test_load_feature_collection() {
        let boundary = Boundary::from_geojson_str(SQUARE_WITH_HOLE).unwrap();
        assert_eq!(boundary.crs(), Crs::Wgs84);
        assert_eq!(boundary.bounds().min().x, 12.0);
        assert_eq!(boundary.bounds().max().y, 51.0);
    }

    #[test]
    fn test_contains_respects_holes() {
        let boundary = Boundary::from_geojson_str(SQUARE_WITH_HOLE).unwrap();
        assert!(boundary.contains(13.0, 49.0));
        assert!(!boundary.contains(15.5, 49.75));
        assert!(!boundary.contains(20.0, 49.0));
        assert!(!boundary.contains(f64::NAN, 49.0));
    }

    #[test]
    fn test_build_mask() {
        let boundary = Boundary::from_geojson_str(SQUARE_WITH_HOLE).unwrap();
        let xs = [13.0, 15.5, 25.0];
        let ys = [49.0, 49.75, 49.0];
        assert_eq!(boundary.build_mask(&xs, &ys), vec![true, false, false]);
    }

    #[test]
    fn test_named_crs_member() {
        let text = r#"{
            "type": "Feature",
            "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::3857"}},
            "properties": {},
            "geometry": {"type": "MultiPolygon", "coordinates": [
                [[[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 0.0]]]
            ]}
        }"#;
        let boundary = Boundary::from_geojson_str(text).unwrap();
        assert_eq!(boundary.crs(), Crs::WebMercator);
        assert_eq!(boundary.polygons().0.len(), 1);
    }

    #[test]
    fn test_no_polygons_is_an_error() {
        let text = r#"{"type": "Point", "coordinates": [14.0, 50.0]}"#;
        assert!(Boundary::from_geojson_str(text).is_err());
    }
}
