//! Coordinate transformations between UTM zone 30N and WGS84.
//!
//! The projection pair is fixed: EPSG:32630 (WGS84 / UTM zone 30N) to and
//! from EPSG:4326. Both directions use the Krüger series to third order in
//! the third flattening, which is accurate to about a millimetre inside the
//! zone.

use std::f64::consts::FRAC_PI_2;

use thiserror::Error;

use super::records::GeoPoint;

/// WGS84 semi-major axis in metres.
const WGS84_A: f64 = 6_378_137.0;

/// WGS84 flattening.
const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// UTM scale factor on the central meridian.
const K0: f64 = 0.9996;

/// UTM false easting in metres.
const FALSE_EASTING: f64 = 500_000.0;

/// UTM zone of the source projection.
pub const UTM_ZONE: u8 = 30;

/// Central meridian of zone 30, in degrees.
pub const CENTRAL_MERIDIAN_DEG: f64 = (UTM_ZONE as f64) * 6.0 - 183.0;

/// Errors produced by the reprojector. Row-level: the row is dropped, not the batch.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum CoordinateError {
    #[error("non-finite projected coordinate ({x}, {y})")]
    NonFinite { x: f64, y: f64 },

    #[error("derived position out of WGS84 range (lat {latitude:.4}, lon {longitude:.4})")]
    OutOfRange { latitude: f64, longitude: f64 },

    #[error("geographic position (lat {latitude}, lon {longitude}) cannot be projected to UTM zone 30N")]
    Unprojectable { latitude: f64, longitude: f64 },
}

/// Coefficients of the Krüger series for the WGS84 ellipsoid.
struct KrugerSeries {
    /// Third flattening
    n: f64,
    /// Rectifying radius
    a_rect: f64,
    alpha: [f64; 3],
    beta: [f64; 3],
    delta: [f64; 3],
}

fn kruger() -> KrugerSeries {
    let n = WGS84_F / (2.0 - WGS84_F);
    let n2 = n * n;
    let n3 = n2 * n;
    let n4 = n3 * n;

    KrugerSeries {
        n,
        a_rect: WGS84_A / (1.0 + n) * (1.0 + n2 / 4.0 + n4 / 64.0),
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
    }
}

/// Convert a UTM zone 30N pair to a WGS84 position.
///
/// # Arguments
///
/// * `x` - Easting in metres
/// * `y` - Northing in metres
///
/// # Errors
///
/// * [`CoordinateError::NonFinite`] when either input is NaN or infinite
/// * [`CoordinateError::OutOfRange`] when the derived position is outside
///   [-90, 90] x [-180, 180]. Northings beyond the pole are caught through
///   their footprint latitude, which the series would otherwise fold back
///   below 90 degrees.
///
/// # Example
///
/// ```
/// use grid_screening::core::transforms::utm30_to_wgs84;
///
/// let p = utm30_to_wgs84(500_000.0, 0.0).unwrap();
/// assert!(p.latitude.abs() < 1e-9);
/// assert!((p.longitude + 3.0).abs() < 1e-9);
/// ```
pub fn utm30_to_wgs84(x: f64, y: f64) -> Result<GeoPoint, CoordinateError> {
    if !x.is_finite() || !y.is_finite() {
        return Err(CoordinateError::NonFinite { x, y });
    }

    let s = kruger();
    let xi = y / (K0 * s.a_rect);
    let eta = (x - FALSE_EASTING) / (K0 * s.a_rect);

    let mut xi_p = xi;
    let mut eta_p = eta;
    for (j, beta) in s.beta.iter().enumerate() {
        let k = 2.0 * (j + 1) as f64;
        xi_p -= beta * (k * xi).sin() * (k * eta).cosh();
        eta_p -= beta * (k * xi).cos() * (k * eta).sinh();
    }

    let longitude = CENTRAL_MERIDIAN_DEG + eta_p.sinh().atan2(xi_p.cos()).to_degrees();

    if !xi_p.is_finite() || xi_p.abs() > FRAC_PI_2 {
        return Err(CoordinateError::OutOfRange {
            latitude: xi_p.to_degrees(),
            longitude,
        });
    }

    let chi = (xi_p.sin() / eta_p.cosh()).asin();
    let mut phi = chi;
    for (j, delta) in s.delta.iter().enumerate() {
        let k = 2.0 * (j + 1) as f64;
        phi += delta * (k * chi).sin();
    }

    let point = GeoPoint::new(phi.to_degrees(), longitude);
    if !point.is_valid() {
        return Err(CoordinateError::OutOfRange {
            latitude: point.latitude,
            longitude: point.longitude,
        });
    }

    Ok(point)
}

/// Convert a WGS84 position to a UTM zone 30N pair `(easting, northing)`.
///
/// The inverse of [`utm30_to_wgs84`]. Positions at the poles or a quarter
/// turn or more away from the central meridian have no projection.
pub fn wgs84_to_utm30(latitude: f64, longitude: f64) -> Result<(f64, f64), CoordinateError> {
    let d_lambda = (longitude - CENTRAL_MERIDIAN_DEG).to_radians();

    if !latitude.is_finite()
        || !longitude.is_finite()
        || latitude.abs() >= 90.0
        || d_lambda.abs() >= FRAC_PI_2
    {
        return Err(CoordinateError::Unprojectable { latitude, longitude });
    }

    let s = kruger();
    let phi = latitude.to_radians();
    let c = 2.0 * s.n.sqrt() / (1.0 + s.n);
    let t = (phi.sin().atanh() - c * (c * phi.sin()).atanh()).sinh();

    let xi_p = (t / d_lambda.cos()).atan();
    let eta_p = (d_lambda.sin() / (1.0 + t * t).sqrt()).atanh();

    let mut easting = eta_p;
    let mut northing = xi_p;
    for (j, alpha) in s.alpha.iter().enumerate() {
        let k = 2.0 * (j + 1) as f64;
        easting += alpha * (k * xi_p).cos() * (k * eta_p).sinh();
        northing += alpha * (k * xi_p).sin() * (k * eta_p).cosh();
    }

    Ok((
        FALSE_EASTING + K0 * s.a_rect * easting,
        K0 * s.a_rect * northing,
    ))
}
