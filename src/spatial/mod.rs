pub mod boundary;
pub mod crs;
pub mod raster;

pub use boundary::Boundary;
pub use crs::{CoordinateProjector, Crs};
pub use raster::{ElevationRaster, GeoTransform};
