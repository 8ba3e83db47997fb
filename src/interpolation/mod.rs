//! Regression-kriging of hourly station temperatures onto a masked grid.

pub mod kriging;
pub mod regression;
pub mod variogram;

pub use kriging::OrdinaryKriging;
pub use regression::{RegressionModel, Regressor};
pub use variogram::{FittedVariogram, VariogramModel};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ProcessingError, Result};
use crate::models::{EnrichedRecord, InterpolationGrid};
use crate::spatial::{Boundary, CoordinateProjector, Crs, ElevationRaster};
use crate::utils::constants::{
    DEFAULT_NLAGS, DEFAULT_REGRESSION_MODEL, DEFAULT_VARIOGRAM_MODEL, DEFAULT_X_POINTS,
    DEFAULT_Y_POINTS, MIN_KRIGING_POINTS,
};

/// Number of grid points along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridShape {
    pub x_points: usize,
    pub y_points: usize,
}

impl Default for GridShape {
    fn default() -> Self {
        Self {
            x_points: DEFAULT_X_POINTS,
            y_points: DEFAULT_Y_POINTS,
        }
    }
}

/// Model identifiers as configured. They are parsed on every call so a bad
/// identifier fails the hour that uses it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelParams {
    pub regression_model: String,
    pub variogram_model: String,
    pub nlags: usize,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            regression_model: DEFAULT_REGRESSION_MODEL.to_string(),
            variogram_model: DEFAULT_VARIOGRAM_MODEL.to_string(),
            nlags: DEFAULT_NLAGS,
        }
    }
}

impl ModelParams {
    pub fn regression(&self) -> Result<RegressionModel> {
        self.regression_model.parse()
    }

    pub fn variogram(&self) -> Result<VariogramModel> {
        self.variogram_model.parse()
    }
}

/// Regular grid over a bounding box, `np.mgrid` style: both ends inclusive,
/// flattened as `i * ny + j`.
pub fn regular_grid(
    (min_x, min_y): (f64, f64),
    (max_x, max_y): (f64, f64),
    shape: GridShape,
) -> (Vec<f64>, Vec<f64>) {
    let axis = |lo: f64, hi: f64, n: usize| -> Vec<f64> {
        match n {
            0 => Vec::new(),
            1 => vec![lo],
            _ => (0..n)
                .map(|k| lo + (hi - lo) * k as f64 / (n - 1) as f64)
                .collect(),
        }
    };
    let xs = axis(min_x, max_x, shape.x_points);
    let ys = axis(min_y, max_y, shape.y_points);

    let mut grid_x = Vec::with_capacity(xs.len() * ys.len());
    let mut grid_y = Vec::with_capacity(xs.len() * ys.len());
    for x in &xs {
        for y in &ys {
            grid_x.push(*x);
            grid_y.push(*y);
        }
    }
    (grid_x, grid_y)
}

fn nan_mean(values: &[f64]) -> Option<f64> {
    let (sum, count) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

fn fill_nan(values: &mut [f64], fill: f64) {
    for v in values.iter_mut().filter(|v| !v.is_finite()) {
        *v = fill;
    }
}

#[derive(Debug, Clone)]
pub struct InterpolationEngine {
    working_crs: Crs,
}

impl InterpolationEngine {
    /// `working_crs` is the CRS the records' `(x, y)` are expressed in.
    pub fn new(working_crs: Crs) -> Self {
        Self { working_crs }
    }

    pub fn working_crs(&self) -> Crs {
        self.working_crs
    }

    pub fn interpolate(
        &self,
        records: &[EnrichedRecord],
        boundary: &Boundary,
        raster: &ElevationRaster,
        shape: GridShape,
        params: &ModelParams,
    ) -> Result<InterpolationGrid> {
        let regression_model = params.regression()?;
        let variogram_model = params.variogram()?;

        if shape.x_points == 0 || shape.y_points == 0 {
            return Err(ProcessingError::InvalidConfig(format!(
                "Grid shape must be positive, got {}x{}",
                shape.x_points, shape.y_points
            )));
        }

        let usable: Vec<&EnrichedRecord> = records.iter().filter(|r| r.is_usable()).collect();
        if usable.len() < MIN_KRIGING_POINTS {
            return Err(ProcessingError::InsufficientData {
                found: usable.len(),
                required: MIN_KRIGING_POINTS,
            });
        }

        let bounds = boundary.bounds();
        let (grid_x, grid_y) = regular_grid(bounds.min().x_y(), bounds.max().x_y(), shape);
        let mask = boundary.build_mask(&grid_x, &grid_y);

        // Stations: working CRS -> raster CRS.
        let to_raster = CoordinateProjector::new(self.working_crs, raster.crs());
        let station_xy: Vec<(f64, f64)> = usable
            .iter()
            .map(|r| to_raster.transform(r.x, r.y))
            .collect();
        let temperatures: Vec<f64> = usable.iter().map(|r| r.temperature).collect();

        let mut station_elev: Vec<f64> = station_xy
            .iter()
            .map(|(x, y)| raster.sample(*x, *y))
            .collect();
        let mean_elev = nan_mean(&station_elev).unwrap_or(0.0);
        fill_nan(&mut station_elev, mean_elev);

        let mut trend = regression_model.build();
        trend.fit(&station_elev, &temperatures)?;
        let residuals: Vec<f64> = temperatures
            .iter()
            .zip(trend.predict_all(&station_elev))
            .map(|(t, p)| t - p)
            .collect();

        let kriging = OrdinaryKriging::fit(&station_xy, &residuals, variogram_model, params.nlags)?;
        debug!(
            stations = usable.len(),
            regression = %regression_model,
            variogram = %variogram_model,
            psill = kriging.variogram().psill,
            range = kriging.variogram().range,
            nugget = kriging.variogram().nugget,
            "Fitted regression-kriging model"
        );

        // Grid: boundary CRS -> raster CRS, only for cells that will be predicted.
        let grid_to_raster = CoordinateProjector::new(boundary.crs(), raster.crs());
        let inside: Vec<usize> = (0..mask.len()).filter(|i| mask[*i]).collect();
        let cell_xy: Vec<(f64, f64)> = inside
            .iter()
            .map(|i| grid_to_raster.transform(grid_x[*i], grid_y[*i]))
            .collect();

        let cell_values: Vec<f64> = cell_xy
            .par_iter()
            .map(|(x, y)| -> Result<f64> {
                let mut elevation = raster.sample(*x, *y);
                if !elevation.is_finite() {
                    elevation = mean_elev;
                }
                let residual = kriging.predict(*x, *y)?;
                Ok(trend.predict(elevation) + residual)
            })
            .collect::<Result<Vec<f64>>>()?;

        let mut predicted = vec![f64::NAN; grid_x.len()];
        for (idx, value) in inside.iter().zip(cell_values) {
            if !value.is_finite() {
                return Err(ProcessingError::Interpolation(format!(
                    "Non-finite prediction at grid point ({:.3}, {:.3})",
                    grid_x[*idx], grid_y[*idx]
                )));
            }
            predicted[*idx] = value;
        }

        info!(
            stations = usable.len(),
            cells = inside.len(),
            "Interpolated {}x{} grid",
            shape.x_points,
            shape.y_points
        );

        Ok(InterpolationGrid {
            nx: shape.x_points,
            ny: shape.y_points,
            grid_x,
            grid_y,
            predicted,
            mask,
        })
    }
}
