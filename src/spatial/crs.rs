//! Coordinate reference systems used by the pipeline.
//!
//! Station reports arrive in WGS84, the country boundary is usually WGS84 and
//! elevation rasters are commonly Web Mercator, ETRS89-LAEA or UTM. Every
//! transformation pivots through geographic WGS84 coordinates.
//!
//! The projections are implemented from their closed-form series so no PROJ
//! installation is needed; accuracy is well below a raster cell.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};
use std::fmt;
use std::str::FromStr;

use crate::error::{ProcessingError, Result};
use crate::models::EnrichedRecord;

/// WGS84 semi-major axis (metres)
const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// GRS80 flattening, used by ETRS89 projections
const GRS80_F: f64 = 1.0 / 298.257_222_101;

/// Web Mercator stops being finite at the poles.
const MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// EPSG:3035 parameters
const LAEA_LAT0: f64 = 52.0;
const LAEA_LON0: f64 = 10.0;
const LAEA_FALSE_EASTING: f64 = 4_321_000.0;
const LAEA_FALSE_NORTHING: f64 = 3_210_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Crs {
    /// EPSG:4326, x = longitude, y = latitude in degrees
    Wgs84,
    /// EPSG:3857
    WebMercator,
    /// EPSG:3035, ETRS89 Lambert Azimuthal Equal Area (Europe)
    EtrsLaea,
    /// EPSG:326zz / 327zz, and ETRS89 258zz treated as equivalent
    Utm { zone: u8, north: bool },
}

impl Crs {
    pub fn from_epsg(code: u32) -> Result<Self> {
        match code {
            4326 | 4258 => Ok(Crs::Wgs84),
            3857 | 900913 => Ok(Crs::WebMercator),
            3035 => Ok(Crs::EtrsLaea),
            32601..=32660 => Ok(Crs::Utm {
                zone: (code - 32600) as u8,
                north: true,
            }),
            32701..=32760 => Ok(Crs::Utm {
                zone: (code - 32700) as u8,
                north: false,
            }),
            25828..=25838 => Ok(Crs::Utm {
                zone: (code - 25800) as u8,
                north: true,
            }),
            _ => Err(ProcessingError::UnsupportedCrs(format!("EPSG:{}", code))),
        }
    }

    pub fn epsg(&self) -> u32 {
        match self {
            Crs::Wgs84 => 4326,
            Crs::WebMercator => 3857,
            Crs::EtrsLaea => 3035,
            Crs::Utm { zone, north: true } => 32600 + *zone as u32,
            Crs::Utm { zone, north: false } => 32700 + *zone as u32,
        }
    }

    /// Project geographic WGS84 degrees into this CRS.
    pub fn from_geographic(&self, lon: f64, lat: f64) -> (f64, f64) {
        match self {
            Crs::Wgs84 => (lon, lat),
            Crs::WebMercator => mercator_forward(lon, lat),
            Crs::EtrsLaea => laea_forward(lon, lat),
            Crs::Utm { zone, north } => utm_forward(*zone, *north, lon, lat),
        }
    }

    /// Unproject coordinates of this CRS into geographic WGS84 degrees.
    pub fn to_geographic(&self, x: f64, y: f64) -> (f64, f64) {
        match self {
            Crs::Wgs84 => (x, y),
            Crs::WebMercator => mercator_inverse(x, y),
            Crs::EtrsLaea => laea_inverse(x, y),
            Crs::Utm { zone, north } => utm_inverse(*zone, *north, x, y),
        }
    }
}

impl FromStr for Crs {
    type Err = ProcessingError;

    /// Accepts `EPSG:3857`, bare codes, OGC URNs and `CRS84`.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let upper = trimmed.to_ascii_uppercase();
        if upper.ends_with("CRS84") {
            return Ok(Crs::Wgs84);
        }

        let code = upper
            .rsplit(|c| c == ':' || c == '/')
            .find(|part| !part.is_empty())
            .and_then(|part| part.parse::<u32>().ok())
            .ok_or_else(|| ProcessingError::UnsupportedCrs(trimmed.to_string()))?;

        Crs::from_epsg(code)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

/// Transforms coordinates between two CRSs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateProjector {
    from: Crs,
    to: Crs,
}

impl CoordinateProjector {
    pub fn new(from: Crs, to: Crs) -> Self {
        Self { from, to }
    }

    pub fn is_identity(&self) -> bool {
        self.from == self.to
    }

    pub fn transform(&self, x: f64, y: f64) -> (f64, f64) {
        if self.is_identity() || !x.is_finite() || !y.is_finite() {
            return (x, y);
        }
        let (lon, lat) = self.from.to_geographic(x, y);
        self.to.from_geographic(lon, lat)
    }

    /// Set each record's `(x, y)` from its longitude/latitude.
    ///
    /// The projector's source must be the station report CRS (WGS84).
    pub fn project_records(&self, records: &mut [EnrichedRecord]) {
        for record in records.iter_mut() {
            let (x, y) = self.transform(record.longitude, record.latitude);
            record.x = x;
            record.y = y;
        }
    }
}

fn mercator_forward(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT);
    let x = WGS84_A * lon.to_radians();
    let y = WGS84_A * (FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    (x, y)
}

fn mercator_inverse(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / WGS84_A).to_degrees();
    let lat = (2.0 * (y / WGS84_A).exp().atan() - FRAC_PI_2).to_degrees();
    (lon, lat)
}

fn eccentricity_squared(f: f64) -> f64 {
    f * (2.0 - f)
}

/// Authalic latitude helper `q` (EPSG guidance note 7-2).
fn laea_q(phi: f64, e: f64) -> f64 {
    let e2 = e * e;
    let s = phi.sin();
    (1.0 - e2) * (s / (1.0 - e2 * s * s) - (1.0 / (2.0 * e)) * ((1.0 - e * s) / (1.0 + e * s)).ln())
}

struct LaeaConstants {
    e2: f64,
    rq: f64,
    d: f64,
    beta0: f64,
    qp: f64,
    e: f64,
}

fn laea_constants() -> LaeaConstants {
    let e2 = eccentricity_squared(GRS80_F);
    let e = e2.sqrt();
    let phi0 = LAEA_LAT0.to_radians();
    let qp = laea_q(FRAC_PI_2, e);
    let q0 = laea_q(phi0, e);
    let beta0 = (q0 / qp).asin();
    let rq = WGS84_A * (qp / 2.0).sqrt();
    let d = WGS84_A * (phi0.cos() / (1.0 - e2 * phi0.sin().powi(2)).sqrt()) / (rq * beta0.cos());
    LaeaConstants {
        e2,
        rq,
        d,
        beta0,
        qp,
        e,
    }
}

fn laea_forward(lon: f64, lat: f64) -> (f64, f64) {
    let c = laea_constants();
    let phi = lat.to_radians();
    let dlambda = (lon - LAEA_LON0).to_radians();
    let beta = (laea_q(phi, c.e) / c.qp).clamp(-1.0, 1.0).asin();

    let b = c.rq
        * (2.0 / (1.0 + c.beta0.sin() * beta.sin() + c.beta0.cos() * beta.cos() * dlambda.cos())).sqrt();
    let x = LAEA_FALSE_EASTING + b * c.d * beta.cos() * dlambda.sin();
    let y = LAEA_FALSE_NORTHING
        + (b / c.d) * (c.beta0.cos() * beta.sin() - c.beta0.sin() * beta.cos() * dlambda.cos());
    (x, y)
}

fn laea_inverse(x: f64, y: f64) -> (f64, f64) {
    let c = laea_constants();
    let de = x - LAEA_FALSE_EASTING;
    let dn = y - LAEA_FALSE_NORTHING;
    let rho = ((de / c.d).powi(2) + (c.d * dn).powi(2)).sqrt();
    if rho < 1e-9 {
        return (LAEA_LON0, LAEA_LAT0);
    }

    let cc = 2.0 * (rho / (2.0 * c.rq)).clamp(-1.0, 1.0).asin();
    let beta = (cc.cos() * c.beta0.sin() + (c.d * dn * cc.sin() * c.beta0.cos()) / rho)
        .clamp(-1.0, 1.0)
        .asin();
    let lambda = LAEA_LON0.to_radians()
        + (de * cc.sin()).atan2(
            c.d * rho * c.beta0.cos() * cc.cos() - c.d * c.d * dn * cc.sin() * c.beta0.sin(),
        );

    let e2 = c.e2;
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    let phi = beta
        + (e2 / 3.0 + 31.0 * e4 / 180.0 + 517.0 * e6 / 5040.0) * (2.0 * beta).sin()
        + (23.0 * e4 / 360.0 + 251.0 * e6 / 3780.0) * (4.0 * beta).sin()
        + (761.0 * e6 / 45360.0) * (6.0 * beta).sin();

    (lambda.to_degrees(), phi.to_degrees())
}

fn utm_central_meridian(zone: u8) -> f64 {
    (zone as f64 * 6.0 - 183.0).to_radians()
}

fn meridian_arc(phi: f64, e2: f64) -> f64 {
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    WGS84_A
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}

fn utm_forward(zone: u8, north: bool, lon: f64, lat: f64) -> (f64, f64) {
    let e2 = eccentricity_squared(WGS84_F);
    let ep2 = e2 / (1.0 - e2);
    let phi = lat.to_radians();
    let lambda = lon.to_radians();

    let n = WGS84_A / (1.0 - e2 * phi.sin().powi(2)).sqrt();
    let t = phi.tan().powi(2);
    let c = ep2 * phi.cos().powi(2);
    let a = (lambda - utm_central_meridian(zone)) * phi.cos();
    let m = meridian_arc(phi, e2);

    let x = UTM_K0
        * n
        * (a + (1.0 - t + c) * a.powi(3) / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0)
        + UTM_FALSE_EASTING;
    let mut y = UTM_K0
        * (m + n
            * phi.tan()
            * (a * a / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0));
    if !north {
        y += UTM_FALSE_NORTHING_SOUTH;
    }
    (x, y)
}

fn utm_inverse(zone: u8, north: bool, x: f64, y: f64) -> (f64, f64) {
    let e2 = eccentricity_squared(WGS84_F);
    let ep2 = e2 / (1.0 - e2);
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    let northing = if north { y } else { y - UTM_FALSE_NORTHING_SOUTH };

    let m = northing / UTM_K0;
    let mu = m / (WGS84_A * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));
    let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());

    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let sin1 = phi1.sin();
    let c1 = ep2 * phi1.cos().powi(2);
    let t1 = phi1.tan().powi(2);
    let n1 = WGS84_A / (1.0 - e2 * sin1 * sin1).sqrt();
    let r1 = WGS84_A * (1.0 - e2) / (1.0 - e2 * sin1 * sin1).powf(1.5);
    let d = (x - UTM_FALSE_EASTING) / (n1 * UTM_K0);

    let phi = phi1
        - (n1 * phi1.tan() / r1)
            * (d * d / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                    * d.powi(6)
                    / 720.0);
    let lambda = utm_central_meridian(zone)
        + (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d.powi(5)
                / 120.0)
            / phi1.cos();

    let lon = lambda.to_degrees();
    let lon = if lon > 180.0 { lon - 360.0 } else if lon < -180.0 { lon + 360.0 } else { lon };
    (lon, phi.to_degrees())
}
