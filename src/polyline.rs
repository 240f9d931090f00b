//! Encoded polyline decoding.
//!
//! Strava ships route geometry as a Google encoded polyline: every coordinate is
//! stored as a zig-zag, 5-bit-chunked delta from the previous one. Each point
//! therefore depends on all points before it, so decoding is a single
//! left-to-right pass.
//!
//! Reference: <https://developers.google.com/maps/documentation/utilities/polylinealgorithm>

use thiserror::Error;

use crate::GpsPoint;

/// Precision used by Strava summary polylines (1e5).
pub const STRAVA_PRECISION: u32 = 5;

/// Why a polyline string could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolylineError {
    #[error("byte {byte:#04x} at position {position} is outside the polyline alphabet")]
    InvalidByte { position: usize, byte: u8 },
    #[error("polyline ends in the middle of a value at position {position}")]
    Truncated { position: usize },
    #[error("value starting at position {position} does not fit in 64 bits")]
    Overflow { position: usize },
}

/// Decode an encoded polyline into ordered `(lat, lon)` points.
///
/// `precision` is the number of decimal digits the encoder scaled by
/// (5 for Strava and Google, 6 for OSRM/Valhalla).
///
/// # Example
///
/// ```rust
/// use activity_mapper::polyline::decode;
///
/// let points = decode("_p~iF~ps|U_ulLnnqC_mqNvxq`@", 5).unwrap();
/// assert_eq!(points.len(), 3);
/// assert_eq!(points[0].latitude, 38.5);
/// assert_eq!(points[0].longitude, -120.2);
/// ```
pub fn decode(encoded: &str, precision: u32) -> Result<Vec<GpsPoint>, PolylineError> {
    let factor = 10f64.powi(precision as i32);
    let bytes = encoded.as_bytes();
    let mut points = Vec::with_capacity(bytes.len() / 4);

    let mut position = 0;
    let mut lat: i64 = 0;
    let mut lng: i64 = 0;

    while position < bytes.len() {
        lat = lat.wrapping_add(next_delta(bytes, &mut position)?);
        if position >= bytes.len() {
            return Err(PolylineError::Truncated { position });
        }
        lng = lng.wrapping_add(next_delta(bytes, &mut position)?);

        points.push(GpsPoint::new(lat as f64 / factor, lng as f64 / factor));
    }

    Ok(points)
}

/// Read one zig-zag encoded value starting at `position`, advancing past it.
fn next_delta(bytes: &[u8], position: &mut usize) -> Result<i64, PolylineError> {
    let start = *position;
    let mut result: u64 = 0;
    let mut shift = 0u32;

    loop {
        let Some(&byte) = bytes.get(*position) else {
            return Err(PolylineError::Truncated { position: *position });
        };
        if !(63..=126).contains(&byte) {
            return Err(PolylineError::InvalidByte { position: *position, byte });
        }
        if shift > 60 {
            return Err(PolylineError::Overflow { position: start });
        }

        let chunk = u64::from(byte - 63);
        result |= (chunk & 0x1f) << shift;
        shift += 5;
        *position += 1;

        if chunk < 0x20 {
            break;
        }
    }

    let value = (result >> 1) as i64;
    Ok(if result & 1 == 1 { !value } else { value })
}
