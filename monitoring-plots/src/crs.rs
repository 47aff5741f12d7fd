//! Coordinate reference systems.
//!
//! Resolves EPSG codes to the handful of systems planting site maps use and
//! converts coordinates between them through WGS84 longitude/latitude:
//!
//! - EPSG:4326: WGS84 geographic (x = longitude, y = latitude, degrees)
//! - EPSG:3857: spherical Web Mercator (meters)
//! - EPSG:32601–32660 / 32701–32760: WGS84 UTM north/south zones (meters)
//!
//! UTM uses the Krüger series for the transverse Mercator projection,
//! truncated at the third order of the third flattening, which is accurate
//! to well under a millimeter inside a zone.

use crate::error::{PlotError, Result};
use geo_types::Coord;
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

/// EPSG code of WGS84 geographic coordinates.
pub const WGS84_SRID: u32 = 4326;

/// EPSG code of spherical Web Mercator.
pub const WEB_MERCATOR_SRID: u32 = 3857;

// WGS84 ellipsoid
const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;

const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// A resolved coordinate reference system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Crs {
    /// Longitude/latitude in degrees on the WGS84 ellipsoid.
    Wgs84,
    /// Spherical Web Mercator.
    WebMercator,
    /// Universal Transverse Mercator.
    Utm { zone: u8, north: bool },
}

impl Crs {
    /// Resolve an EPSG code.
    pub fn from_srid(srid: u32) -> Result<Self> {
        match srid {
            WGS84_SRID => Ok(Crs::Wgs84),
            WEB_MERCATOR_SRID => Ok(Crs::WebMercator),
            32601..=32660 => Ok(Crs::Utm {
                zone: (srid - 32600) as u8,
                north: true,
            }),
            32701..=32760 => Ok(Crs::Utm {
                zone: (srid - 32700) as u8,
                north: false,
            }),
            _ => Err(PlotError::UnsupportedCrs(srid)),
        }
    }

    /// The UTM zone whose projection is appropriate for a location.
    pub fn utm_for(lon_lat: Coord<f64>) -> Self {
        let lon = normalize_longitude(lon_lat.x);
        let zone = (((lon + 180.0) / 6.0).floor() as i64 + 1).clamp(1, 60) as u8;
        Crs::Utm {
            zone,
            north: lon_lat.y >= 0.0,
        }
    }

    /// EPSG code of this system.
    pub fn srid(&self) -> u32 {
        match self {
            Crs::Wgs84 => WGS84_SRID,
            Crs::WebMercator => WEB_MERCATOR_SRID,
            Crs::Utm { zone, north: true } => 32600 + *zone as u32,
            Crs::Utm { zone, north: false } => 32700 + *zone as u32,
        }
    }

    /// True if coordinates are meters on a plane rather than degrees.
    pub fn is_projected(&self) -> bool {
        !matches!(self, Crs::Wgs84)
    }

    /// Convert a coordinate in this system to WGS84 longitude/latitude.
    pub fn to_lon_lat(&self, coord: Coord<f64>) -> Coord<f64> {
        match self {
            Crs::Wgs84 => coord,
            Crs::WebMercator => Coord {
                x: (coord.x / WGS84_A).to_degrees(),
                y: (2.0 * (coord.y / WGS84_A).exp().atan() - FRAC_PI_2).to_degrees(),
            },
            Crs::Utm { zone, north } => utm_inverse(coord, *zone, *north),
        }
    }

    /// Convert WGS84 longitude/latitude to a coordinate in this system.
    pub fn from_lon_lat(&self, lon_lat: Coord<f64>) -> Coord<f64> {
        match self {
            Crs::Wgs84 => lon_lat,
            Crs::WebMercator => Coord {
                x: WGS84_A * lon_lat.x.to_radians(),
                y: WGS84_A * (FRAC_PI_4 + lon_lat.y.to_radians() / 2.0).tan().ln(),
            },
            Crs::Utm { zone, north } => utm_forward(lon_lat, *zone, *north),
        }
    }

    /// Convert a coordinate from this system to another.
    pub fn transform(&self, coord: Coord<f64>, target: &Crs) -> Coord<f64> {
        if self == target {
            coord
        } else {
            target.from_lon_lat(self.to_lon_lat(coord))
        }
    }
}

fn normalize_longitude(lon: f64) -> f64 {
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 && lon > 0.0 {
        180.0
    } else {
        wrapped
    }
}

fn central_meridian(zone: u8) -> f64 {
    (zone as f64 * 6.0 - 183.0).to_radians()
}

/// Series coefficients for the transverse Mercator projection.
struct KruegerSeries {
    /// Rectifying radius.
    a: f64,
    alpha: [f64; 3],
    beta: [f64; 3],
    delta: [f64; 3],
    /// `2√n / (1 + n)`, the eccentricity-like term in the conformal latitude.
    e: f64,
}

impl KruegerSeries {
    fn wgs84() -> Self {
        let n = WGS84_F / (2.0 - WGS84_F);
        let n2 = n * n;
        let n3 = n2 * n;
        Self {
            a: WGS84_A / (1.0 + n) * (1.0 + n2 / 4.0 + n2 * n2 / 64.0),
            alpha: [
                n / 2.0 - 2.0 * n2 / 3.0 + 5.0 * n3 / 16.0,
                13.0 * n2 / 48.0 - 3.0 * n3 / 5.0,
                61.0 * n3 / 240.0,
            ],
            beta: [
                n / 2.0 - 2.0 * n2 / 3.0 + 37.0 * n3 / 96.0,
                n2 / 48.0 + n3 / 15.0,
                17.0 * n3 / 480.0,
            ],
            delta: [
                2.0 * n - 2.0 * n2 / 3.0 - 2.0 * n3,
                7.0 * n2 / 3.0 - 8.0 * n3 / 5.0,
                56.0 * n3 / 15.0,
            ],
            e: 2.0 * n.sqrt() / (1.0 + n),
        }
    }
}

fn utm_forward(lon_lat: Coord<f64>, zone: u8, north: bool) -> Coord<f64> {
    let series = KruegerSeries::wgs84();
    let phi = lon_lat.y.to_radians();
    let lambda = normalize_longitude(lon_lat.x).to_radians() - central_meridian(zone);

    let sin_phi = phi.sin();
    let t = (sin_phi.atanh() - series.e * (series.e * sin_phi).atanh()).sinh();
    let xi_prime = t.atan2(lambda.cos());
    let eta_prime = (lambda.sin() / (1.0 + t * t).sqrt()).atanh();

    let mut xi = xi_prime;
    let mut eta = eta_prime;
    for (j, alpha) in series.alpha.iter().enumerate() {
        let k = 2.0 * (j + 1) as f64;
        xi += alpha * (k * xi_prime).sin() * (k * eta_prime).cosh();
        eta += alpha * (k * xi_prime).cos() * (k * eta_prime).sinh();
    }

    let false_northing = if north { 0.0 } else { UTM_FALSE_NORTHING_SOUTH };
    Coord {
        x: UTM_FALSE_EASTING + UTM_K0 * series.a * eta,
        y: false_northing + UTM_K0 * series.a * xi,
    }
}

fn utm_inverse(coord: Coord<f64>, zone: u8, north: bool) -> Coord<f64> {
    let series = KruegerSeries::wgs84();
    let false_northing = if north { 0.0 } else { UTM_FALSE_NORTHING_SOUTH };
    let xi = (coord.y - false_northing) / (UTM_K0 * series.a);
    let eta = (coord.x - UTM_FALSE_EASTING) / (UTM_K0 * series.a);

    let mut xi_prime = xi;
    let mut eta_prime = eta;
    for (j, beta) in series.beta.iter().enumerate() {
        let k = 2.0 * (j + 1) as f64;
        xi_prime -= beta * (k * xi).sin() * (k * eta).cosh();
        eta_prime -= beta * (k * xi).cos() * (k * eta).sinh();
    }

    let chi = (xi_prime.sin() / eta_prime.cosh()).asin();
    let mut phi = chi;
    for (j, delta) in series.delta.iter().enumerate() {
        let k = 2.0 * (j + 1) as f64;
        phi += delta * (k * chi).sin();
    }
    let lambda = central_meridian(zone) + eta_prime.sinh().atan2(xi_prime.cos());

    Coord {
        x: lambda.to_degrees(),
        y: phi.to_degrees(),
    }
}
