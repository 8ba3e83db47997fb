use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_line_segment_mut;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{ProcessingError, Result};
use crate::models::{InterpolationGrid, RenderedMap};
use crate::spatial::Boundary;
use crate::utils::constants::{DEFAULT_HALF_RANGE, DEFAULT_MEDIAN_OFFSET};
use crate::utils::map_path;
use crate::writers::colormap::{color_scale, Colormap};

/// Turns a predicted grid into an image artifact.
///
/// Implementations must leave the grid untouched.
pub trait MapRenderer: Send + Sync {
    fn render(&self, grid: &InterpolationGrid, boundary: &Boundary, hour_label: &str) -> Result<RenderedMap>;
}

/// One pixel per grid cell, north up, transparent outside the mask.
pub struct PngRenderer {
    images_dir: PathBuf,
    colormap: Colormap,
    show_boundary: bool,
    half_range: i32,
    median_offset: f64,
}

impl PngRenderer {
    pub fn new(images_dir: impl Into<PathBuf>, colormap: Colormap) -> Self {
        Self {
            images_dir: images_dir.into(),
            colormap,
            show_boundary: false,
            half_range: DEFAULT_HALF_RANGE,
            median_offset: DEFAULT_MEDIAN_OFFSET,
        }
    }

    pub fn with_boundary(mut self, show_boundary: bool) -> Self {
        self.show_boundary = show_boundary;
        self
    }

    pub fn with_scale(mut self, half_range: i32, median_offset: f64) -> Self {
        self.half_range = half_range;
        self.median_offset = median_offset;
        self
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    pub fn draw(&self, grid: &InterpolationGrid, boundary: &Boundary, vmin: i32, vmax: i32) -> RgbaImage {
        let (width, height) = (grid.nx as u32, grid.ny as u32);
        let mut image = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));

        for i in 0..grid.nx {
            for j in 0..grid.ny {
                let value = grid.value(i, j);
                if !grid.is_inside(i, j) || !value.is_finite() {
                    continue;
                }
                let [r, g, b] = self.colormap.color_for(value, vmin as f64, vmax as f64);
                // Row 0 is the northern edge.
                let row = grid.ny - 1 - j;
                image.put_pixel(i as u32, row as u32, Rgba([r, g, b, 255]));
            }
        }

        if self.show_boundary {
            draw_outline(&mut image, boundary);
        }
        image
    }
}

fn draw_outline(image: &mut RgbaImage, boundary: &Boundary) {
    let bounds = boundary.bounds();
    let (min, max) = (bounds.min(), bounds.max());
    let sx = (image.width().max(2) - 1) as f64 / (max.x - min.x).max(f64::EPSILON);
    let sy = (image.height().max(2) - 1) as f64 / (max.y - min.y).max(f64::EPSILON);
    let to_pixel = |x: f64, y: f64| (((x - min.x) * sx) as f32, ((max.y - y) * sy) as f32);

    let black = Rgba([0, 0, 0, 255]);
    for polygon in boundary.polygons() {
        for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
            for line in ring.lines() {
                let start = to_pixel(line.start.x, line.start.y);
                let end = to_pixel(line.end.x, line.end.y);
                draw_line_segment_mut(image, start, end, black);
            }
        }
    }
}

impl MapRenderer for PngRenderer {
    fn render(&self, grid: &InterpolationGrid, boundary: &Boundary, hour_label: &str) -> Result<RenderedMap> {
        if grid.is_empty() {
            return Err(ProcessingError::Render("Grid has no cells".to_string()));
        }
        let median = grid
            .nan_median()
            .ok_or_else(|| ProcessingError::Render("Grid has no finite values to render".to_string()))?;
        let (vmin, vmax) = color_scale(median, self.median_offset, self.half_range);

        let image = self.draw(grid, boundary, vmin, vmax);

        fs::create_dir_all(&self.images_dir)?;
        let path = map_path(&self.images_dir, hour_label, vmin, vmax);
        image.save(&path)?;

        info!(path = %path.display(), vmin, vmax, "Map saved");
        Ok(RenderedMap {
            path,
            value_range: (vmin, vmax),
        })
    }
}
