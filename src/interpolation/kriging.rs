//! Ordinary kriging of regression residuals.

use nalgebra::{DMatrix, DVector, Dyn, LU};
use rayon::prelude::*;
use rstar::primitives::GeomWithData;
use rstar::RTree;

use crate::error::{ProcessingError, Result};
use crate::interpolation::variogram::{
    distance, experimental_semivariogram, fit_variogram, FittedVariogram, VariogramModel,
};
use crate::utils::constants::VARIOGRAM_LAG_BINS;

type IndexedPoint = GeomWithData<[f64; 2], usize>;

/// Minimum separation below which two observations count as the same location.
const DUPLICATE_DISTANCE: f64 = 1e-9;

pub struct OrdinaryKriging {
    coords: Vec<(f64, f64)>,
    values: Vec<f64>,
    variogram: FittedVariogram,
    n_closest: usize,
    tree: RTree<IndexedPoint>,
    /// Factorized system over all observations, used when every prediction
    /// draws on the full set.
    global: Option<LU<f64, Dyn, Dyn>>,
}

impl OrdinaryKriging {
    /// Fit the variogram to `values` at `coords` and prepare for prediction
    /// from the `n_closest` nearest observations.
    pub fn fit(
        coords: &[(f64, f64)],
        values: &[f64],
        model: VariogramModel,
        n_closest: usize,
    ) -> Result<Self> {
        if coords.is_empty() || coords.len() != values.len() {
            return Err(ProcessingError::Interpolation(format!(
                "Kriging needs matching non-empty inputs, got {} points and {} values",
                coords.len(),
                values.len()
            )));
        }
        for i in 0..coords.len() {
            for j in (i + 1)..coords.len() {
                if distance(coords[i], coords[j]) < DUPLICATE_DISTANCE {
                    return Err(ProcessingError::Interpolation(format!(
                        "Observations {} and {} share the location ({:.3}, {:.3}); kriging system is singular",
                        i, j, coords[i].0, coords[i].1
                    )));
                }
            }
        }

        let lags = experimental_semivariogram(coords, values, VARIOGRAM_LAG_BINS);
        let variogram = fit_variogram(model, &lags);
        let n_closest = n_closest.clamp(1, coords.len());

        let tree = RTree::bulk_load(
            coords
                .iter()
                .enumerate()
                .map(|(i, (x, y))| IndexedPoint::new([*x, *y], i))
                .collect(),
        );

        let mut kriging = Self {
            coords: coords.to_vec(),
            values: values.to_vec(),
            variogram,
            n_closest,
            tree,
            global: None,
        };

        if !variogram.is_flat() && n_closest == coords.len() {
            let all: Vec<usize> = (0..coords.len()).collect();
            let lu = kriging.system_matrix(&all).lu();
            if !lu.is_invertible() {
                return Err(ProcessingError::Interpolation(
                    "Kriging system over all observations is singular".to_string(),
                ));
            }
            kriging.global = Some(lu);
        }

        Ok(kriging)
    }

    pub fn variogram(&self) -> &FittedVariogram {
        &self.variogram
    }

    pub fn n_closest(&self) -> usize {
        self.n_closest
    }

    fn mean_value(&self) -> f64 {
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    fn system_matrix(&self, idx: &[usize]) -> DMatrix<f64> {
        let n = idx.len();
        DMatrix::from_fn(n + 1, n + 1, |r, c| {
            if r == n && c == n {
                0.0
            } else if r == n || c == n {
                1.0
            } else {
                -self
                    .variogram
                    .gamma(distance(self.coords[idx[r]], self.coords[idx[c]]))
            }
        })
    }

    fn rhs(&self, idx: &[usize], p: (f64, f64)) -> DVector<f64> {
        let n = idx.len();
        DVector::from_fn(n + 1, |r, _| {
            if r == n {
                1.0
            } else {
                -self.variogram.gamma(distance(self.coords[idx[r]], p))
            }
        })
    }

    pub fn predict(&self, x: f64, y: f64) -> Result<f64> {
        if self.variogram.is_flat() {
            return Ok(self.mean_value());
        }

        let p = (x, y);
        let (idx, weights) = match &self.global {
            Some(lu) => {
                let idx: Vec<usize> = (0..self.coords.len()).collect();
                let w = lu.solve(&self.rhs(&idx, p));
                (idx, w)
            }
            None => {
                let idx: Vec<usize> = self
                    .tree
                    .nearest_neighbor_iter(&[x, y])
                    .take(self.n_closest)
                    .map(|point| point.data)
                    .collect();
                let w = self.system_matrix(&idx).lu().solve(&self.rhs(&idx, p));
                (idx, w)
            }
        };

        let weights = weights.ok_or_else(|| {
            ProcessingError::Interpolation(format!("Singular kriging system at ({:.3}, {:.3})", x, y))
        })?;

        let estimate: f64 = idx
            .iter()
            .enumerate()
            .map(|(k, i)| weights[k] * self.values[*i])
            .sum();
        if !estimate.is_finite() {
            return Err(ProcessingError::Interpolation(format!(
                "Kriging produced a non-finite estimate at ({:.3}, {:.3})",
                x, y
            )));
        }
        Ok(estimate)
    }

    pub fn predict_many(&self, points: &[(f64, f64)]) -> Result<Vec<f64>> {
        points.par_iter().map(|(x, y)| self.predict(*x, *y)).collect()
    }
}
