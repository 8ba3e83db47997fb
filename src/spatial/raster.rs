//! Single-band elevation raster loaded from a GeoTIFF.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;
use tracing::{debug, warn};

use crate::error::{ProcessingError, Result};
use crate::spatial::crs::Crs;
use crate::utils::parse_numeric;

const GEO_KEY_GEOGRAPHIC_TYPE: u32 = 2048;
const GEO_KEY_PROJECTED_CS_TYPE: u32 = 3072;
const GEO_KEY_USER_DEFINED: u32 = 32767;

/// GDAL-ordered affine transform `[c, a, b, f, d, e]`:
/// `x = c + col * a + row * b`, `y = f + col * d + row * e`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub c: f64,
    pub a: f64,
    pub b: f64,
    pub f: f64,
    pub d: f64,
    pub e: f64,
}

impl GeoTransform {
    /// North-up transform from the upper-left corner and pixel size.
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            c: origin_x,
            a: pixel_width,
            b: 0.0,
            f: origin_y,
            d: 0.0,
            e: -pixel_height,
        }
    }

    pub fn to_world(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.c + col * self.a + row * self.b,
            self.f + col * self.d + row * self.e,
        )
    }

    /// Fractional (row, col) of a world coordinate.
    pub fn to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let det = self.a * self.e - self.b * self.d;
        let dx = x - self.c;
        let dy = y - self.f;
        let col = (self.e * dx - self.b * dy) / det;
        let row = (-self.d * dx + self.a * dy) / det;
        (row, col)
    }
}

#[derive(Debug, Clone)]
pub struct ElevationRaster {
    width: usize,
    height: usize,
    /// Row-major, NaN where the source held its nodata value.
    data: Vec<f64>,
    transform: GeoTransform,
    crs: Crs,
}

impl ElevationRaster {
    pub fn new(width: usize, height: usize, data: Vec<f64>, transform: GeoTransform, crs: Crs) -> Result<Self> {
        if width == 0 || height == 0 || data.len() != width * height {
            return Err(ProcessingError::InvalidFormat(format!(
                "Raster of {}x{} cells cannot hold {} values",
                width,
                height,
                data.len()
            )));
        }
        let det = transform.a * transform.e - transform.b * transform.d;
        if det == 0.0 || !det.is_finite() {
            return Err(ProcessingError::InvalidFormat(
                "Raster transform is not invertible".to_string(),
            ));
        }

        Ok(Self {
            width,
            height,
            data,
            transform,
            crs,
        })
    }

    /// Load the first band of a GeoTIFF. Nodata values become NaN.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut decoder = Decoder::new(BufReader::new(file))?;
        let (width, height) = decoder.dimensions()?;
        let (width, height) = (width as usize, height as usize);

        let transform = read_transform(&mut decoder)?;
        let crs = read_crs(&mut decoder, path)?;
        let nodata = decoder
            .find_tag(Tag::GdalNodata)?
            .and_then(|v| v.into_string().ok())
            .and_then(|s| parse_numeric(s.trim_end_matches('\0')));

        let samples = decoding_to_f64(decoder.read_image()?)?;
        let bands = samples.len() / (width * height).max(1);
        if bands == 0 {
            return Err(ProcessingError::InvalidFormat(format!(
                "{} holds no raster samples",
                path.display()
            )));
        }

        let data: Vec<f64> = samples
            .into_iter()
            .step_by(bands)
            .take(width * height)
            .map(|v| match nodata {
                Some(nd) if v == nd => f64::NAN,
                _ => v,
            })
            .collect();

        debug!(
            path = %path.display(),
            width,
            height,
            bands,
            crs = %crs,
            nodata = ?nodata,
            "Loaded elevation raster"
        );

        Self::new(width, height, data, transform, crs)
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.width + col]
    }

    /// Raster cell containing `(x, y)` (in the raster CRS), clamped to the raster edges.
    pub fn cell_of(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let (row, col) = self.transform.to_pixel(x, y);
        if !row.is_finite() || !col.is_finite() {
            return None;
        }
        let row = (row.floor().max(0.0) as usize).min(self.height - 1);
        let col = (col.floor().max(0.0) as usize).min(self.width - 1);
        Some((row, col))
    }

    /// Elevation of the cell nearest to `(x, y)`; NaN for nodata or non-finite input.
    pub fn sample(&self, x: f64, y: f64) -> f64 {
        match self.cell_of(x, y) {
            Some((row, col)) => self.get(row, col),
            None => f64::NAN,
        }
    }
}

fn read_transform<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Result<GeoTransform> {
    if let Some(value) = decoder.find_tag(Tag::ModelTransformationTag)? {
        let m = value.into_f64_vec()?;
        if m.len() >= 8 {
            return Ok(GeoTransform {
                c: m[3],
                a: m[0],
                b: m[1],
                f: m[7],
                d: m[4],
                e: m[5],
            });
        }
    }

    let scale = decoder
        .find_tag(Tag::ModelPixelScaleTag)?
        .map(|v| v.into_f64_vec())
        .transpose()?;
    let tiepoint = decoder
        .find_tag(Tag::ModelTiepointTag)?
        .map(|v| v.into_f64_vec())
        .transpose()?;

    match (scale, tiepoint) {
        (Some(scale), Some(tie)) if scale.len() >= 2 && tie.len() >= 6 => {
            let (i, j, x, y) = (tie[0], tie[1], tie[3], tie[4]);
            Ok(GeoTransform::north_up(
                x - i * scale[0],
                y + j * scale[1],
                scale[0],
                scale[1],
            ))
        }
        _ => Err(ProcessingError::MissingData(
            "GeoTIFF has no georeferencing (ModelTransformation or PixelScale+Tiepoint)".to_string(),
        )),
    }
}

fn read_crs<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>, path: &Path) -> Result<Crs> {
    let keys = match decoder.find_tag(Tag::GeoKeyDirectoryTag)? {
        Some(value) => value.into_u32_vec()?,
        None => {
            warn!(path = %path.display(), "GeoTIFF has no GeoKeyDirectory, assuming EPSG:4326");
            return Ok(Crs::Wgs84);
        }
    };

    let lookup = |key: u32| -> Option<u32> {
        keys.get(4..)?
            .chunks_exact(4)
            .find(|entry| entry[0] == key && entry[1] == 0)
            .map(|entry| entry[3])
    };

    match lookup(GEO_KEY_PROJECTED_CS_TYPE).filter(|c| *c != GEO_KEY_USER_DEFINED) {
        Some(code) => Crs::from_epsg(code),
        None => match lookup(GEO_KEY_GEOGRAPHIC_TYPE).filter(|c| *c != GEO_KEY_USER_DEFINED) {
            Some(code) => Crs::from_epsg(code),
            None => {
                warn!(path = %path.display(), "GeoTIFF CRS is user-defined, assuming EPSG:4326");
                Ok(Crs::Wgs84)
            }
        },
    }
}

fn decoding_to_f64(result: DecodingResult) -> Result<Vec<f64>> {
    let values = match result {
        DecodingResult::U8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::F32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::F64(v) => v,
        #[allow(unreachable_patterns)]
        _ => {
            return Err(ProcessingError::InvalidFormat(
                "Unsupported GeoTIFF sample format".to_string(),
            ))
        }
    };
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use tiff::encoder::{colortype, TiffEncoder};

    fn small_raster() -> ElevationRaster {
        // 3x2 cells of 1 degree starting at (12, 51)
        let data = vec![100.0, 200.0, 300.0, 400.0, f64::NAN, 600.0];
        ElevationRaster::new(3, 2, data, GeoTransform::north_up(12.0, 51.0, 1.0, 1.0), Crs::Wgs84).unwrap()
    }

    #[test]
    fn test_sample_nearest_cell() {
        let raster = small_raster();
        assert_eq!(raster.sample(12.5, 50.5), 100.0);
        assert_eq!(raster.sample(14.2, 50.9), 300.0);
        assert_eq!(raster.sample(12.1, 49.5), 400.0);
        assert!(raster.sample(13.5, 49.5).is_nan());
    }

    #[test]
    fn test_sample_clamps_to_edges() {
        let raster = small_raster();
        assert_eq!(raster.sample(0.0, 80.0), 100.0);
        assert_eq!(raster.sample(40.0, 10.0), 600.0);
        assert!(raster.sample(f64::NAN, 50.0).is_nan());
    }

    #[test]
    fn test_rejects_inconsistent_shape() {
        let result = ElevationRaster::new(2, 2, vec![1.0; 3], GeoTransform::north_up(0.0, 0.0, 1.0, 1.0), Crs::Wgs84);
        assert!(result.is_err());
    }

    #[test]
    fn test_transform_round_trip() {
        let t = GeoTransform::north_up(4_000_000.0, 3_100_000.0, 25.0, 25.0);
        let (x, y) = t.to_world(10.0, 4.0);
        assert_eq!((x, y), (4_000_250.0, 3_099_900.0));
        assert_eq!(t.to_pixel(x, y), (4.0, 10.0));
    }

    #[test]
    fn test_load_geotiff_with_nodata() {
        let file = NamedTempFile::new().unwrap();
        {
            let mut encoder = TiffEncoder::new(file.reopen().unwrap()).unwrap();
            let mut image = encoder.new_image::<colortype::Gray32Float>(2, 2).unwrap();
            image
                .encoder()
                .write_tag(Tag::ModelPixelScaleTag, &[100.0f64, 100.0, 0.0][..])
                .unwrap();
            image
                .encoder()
                .write_tag(
                    Tag::ModelTiepointTag,
                    &[0.0f64, 0.0, 0.0, 4_700_000.0, 3_000_000.0, 0.0][..],
                )
                .unwrap();
            image
                .encoder()
                .write_tag(
                    Tag::GeoKeyDirectoryTag,
                    &[1u16, 1, 0, 2, 1024, 0, 1, 1, 3072, 0, 1, 3035][..],
                )
                .unwrap();
            image.encoder().write_tag(Tag::GdalNodata, "-9999").unwrap();
            image.write_data(&[250.0f32, -9999.0, 310.0, 420.0]).unwrap();
        }

        let raster = ElevationRaster::load(file.path()).unwrap();
        assert_eq!(raster.crs(), Crs::EtrsLaea);
        assert_eq!(raster.dimensions(), (2, 2));
        assert_eq!(raster.sample(4_700_050.0, 2_999_950.0), 250.0);
        assert!(raster.sample(4_700_150.0, 2_999_950.0).is_nan());
        assert_eq!(raster.sample(4_700_150.0, 2_999_850.0), 420.0);
    }
}
