//! # Geographic Utilities
//!
//! Geographic helpers used by the parser and the map projection.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two GPS points |
//! | [`polyline_length`] | Total length of a decoded route in meters |
//! | [`compute_bounds`] | Bounding box of a set of points |
//! | [`median_center`] | Per-axis median of a set of points |
//! | [`zoom_for_area`] | Web-map zoom level that fits a bounding box |
//!
//! All functions expect WGS84 coordinates (latitude/longitude in degrees).

use geo::{Distance, Haversine, Point};

use crate::{Bounds, GpsPoint};

/// Breakpoints (bounding-box area in square degrees) for [`zoom_for_area`].
const ZOOM_AREA_BREAKPOINTS: [f64; 7] = [
    0.0,
    1.024e-7,      // 5^-10
    9.536_743e-7,  // 4^-10
    1.693_509e-5,  // 3^-10
    9.765_625e-4,  // 2^-10
    1.0,
    1.0,
];

/// Zoom levels matching [`ZOOM_AREA_BREAKPOINTS`].
const ZOOM_LEVELS: [f64; 7] = [20.0, 15.0, 14.0, 13.0, 12.0, 7.0, 1.0];

// =============================================================================
// Distance Functions
// =============================================================================

/// Calculate the great-circle distance between two GPS points using the Haversine formula.
///
/// # Example
///
/// ```rust
/// use activity_mapper::{GpsPoint, geo_utils};
///
/// let london = GpsPoint::new(51.5074, -0.1278);
/// let paris = GpsPoint::new(48.8566, 2.3522);
///
/// let distance = geo_utils::haversine_distance(&london, &paris);
/// assert!((distance - 343_560.0).abs() < 1000.0); // ~344 km
/// ```
#[inline]
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let point1 = Point::new(p1.longitude, p1.latitude);
    let point2 = Point::new(p2.longitude, p2.latitude);
    Haversine::distance(point1, point2)
}

/// Calculate the total length of a route in meters.
///
/// Sums the haversine distance between consecutive points. Empty or single-point
/// routes return 0.0.
pub fn polyline_length(points: &[GpsPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

// =============================================================================
// Bounding Box Functions
// =============================================================================

/// Compute the bounding box of a set of points.
///
/// For empty input, returns a bounds with MIN/MAX values; use
/// [`Bounds::from_points`] when the input may be empty.
pub fn compute_bounds(points: &[GpsPoint]) -> Bounds {
    let mut min_lat = f64::MAX;
    let mut max_lat = f64::MIN;
    let mut min_lng = f64::MAX;
    let mut max_lng = f64::MIN;

    for p in points {
        min_lat = min_lat.min(p.latitude);
        max_lat = max_lat.max(p.latitude);
        min_lng = min_lng.min(p.longitude);
        max_lng = max_lng.max(p.longitude);
    }

    Bounds { min_lat, max_lat, min_lng, max_lng }
}

// =============================================================================
// Map Framing
// =============================================================================

/// Per-axis median of a set of points, the map center a dashboard opens on.
///
/// Unlike the mean, a handful of activities recorded on holiday far away do not
/// drag the center into the sea. Returns `None` for empty input.
pub fn median_center(points: &[GpsPoint]) -> Option<GpsPoint> {
    if points.is_empty() {
        return None;
    }

    let mut lats: Vec<f64> = points.iter().map(|p| p.latitude).collect();
    let mut lngs: Vec<f64> = points.iter().map(|p| p.longitude).collect();

    Some(GpsPoint::new(median(&mut lats), median(&mut lngs)))
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Pick a web-map zoom level (1 = world, 20 = street) that frames `bounds`.
///
/// The bounding-box area is linearly interpolated over a fixed breakpoint table;
/// anything of a square degree or more gets the world view.
pub fn zoom_for_area(bounds: &Bounds) -> u8 {
    let level = interpolate(bounds.area_deg2(), &ZOOM_AREA_BREAKPOINTS, &ZOOM_LEVELS);
    (level + 1e-5).round().clamp(1.0, 20.0) as u8
}

/// Piecewise-linear interpolation, clamped to the end values outside `xp`.
fn interpolate(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let last = xp.len() - 1;
    if x <= xp[0] {
        return fp[0];
    }
    if x >= xp[last] {
        return fp[last];
    }

    for i in 0..last {
        let (x0, x1) = (xp[i], xp[i + 1]);
        if x >= x0 && x < x1 {
            let ratio = (x - x0) / (x1 - x0);
            return fp[i] + ratio * (fp[i + 1] - fp[i]);
        }
    }

    fp[last]
}

// =============================================================================
// Unit Tests
// =============================================================================
