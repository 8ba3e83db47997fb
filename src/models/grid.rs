use serde::Serialize;
use std::path::PathBuf;

/// Predicted temperature surface on a regular grid.
///
/// Arrays are flattened with `index = i * ny + j`, where `i` walks the x axis
/// and `j` the y axis: `grid_x[idx]` is the i-th x coordinate, `grid_y[idx]`
/// the j-th y coordinate. `predicted` is NaN wherever `mask` is false.
#[derive(Debug, Clone)]
pub struct InterpolationGrid {
    pub nx: usize,
    pub ny: usize,
    pub grid_x: Vec<f64>,
    pub grid_y: Vec<f64>,
    pub predicted: Vec<f64>,
    pub mask: Vec<bool>,
}

impl InterpolationGrid {
    #[inline]
    pub fn index(&self, i: usize, j: usize) -> usize {
        i * self.ny + j
    }

    pub fn value(&self, i: usize, j: usize) -> f64 {
        self.predicted[self.index(i, j)]
    }

    pub fn is_inside(&self, i: usize, j: usize) -> bool {
        self.mask[self.index(i, j)]
    }

    pub fn len(&self) -> usize {
        self.predicted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicted.is_empty()
    }

    /// Values of the cells inside the mask.
    pub fn masked_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.predicted
            .iter()
            .zip(&self.mask)
            .filter(|(_, inside)| **inside)
            .map(|(v, _)| *v)
    }

    pub fn masked_cell_count(&self) -> usize {
        self.mask.iter().filter(|m| **m).count()
    }

    /// Median of the finite values, `None` for an all-NaN grid.
    pub fn nan_median(&self) -> Option<f64> {
        let mut values: Vec<f64> = self.predicted.iter().copied().filter(|v| v.is_finite()).collect();
        if values.is_empty() {
            return None;
        }
        values.sort_by(|a, b| a.total_cmp(b));
        let mid = values.len() / 2;
        if values.len() % 2 == 0 {
            Some((values[mid - 1] + values[mid]) / 2.0)
        } else {
            Some(values[mid])
        }
    }

    /// (min, max) of the finite values.
    pub fn value_bounds(&self) -> Option<(f64, f64)> {
        self.predicted
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

/// The image artifact written for one hour.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedMap {
    pub path: PathBuf,
    /// Colour-scale bounds `(vmin, vmax)` used for the image.
    pub value_range: (i32, i32),
}
