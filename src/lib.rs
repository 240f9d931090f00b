//! # Activity Mapper
//!
//! Concurrent ingestion of a Strava activity history and the aggregate views a
//! dashboard draws from it.
//!
//! This library provides:
//! - A two-stage worker pipeline that paginates the activities endpoint while
//!   parsing already-fetched pages on a separate pool
//! - Record parsing: ISO-week breakdown, polyline decoding, reverse geocoding
//!   through a shared quantized cache
//! - Aggregators for the weekly timeline, weekday histogram, hour-of-day dial,
//!   category rollup and flattened route geometry
//!
//! ## Features
//!
//! - **`http`** (default) - HTTP client with retry/backoff, Strava API access and
//!   Nominatim reverse geocoding
//!
//! Without `http` the parser, pipeline and aggregators still work against any
//! [`ActivitySource`] and [`ReverseGeocoder`] implementation.
//!
//! ## Quick Start
//!
//! ```rust
//! use activity_mapper::{ActivityParser, ConsolidatedTable, RawActivity, weekday_histogram};
//!
//! let raw: Vec<RawActivity> = serde_json::from_str(r#"[
//!     {"id": 1, "name": "Morning Run", "sport_type": "Run",
//!      "start_date_local": "2024-03-04T07:15:00Z", "start_latlng": []}
//! ]"#).unwrap();
//!
//! let parser = ActivityParser::without_geocoding();
//! let table = ConsolidatedTable::from_batches(vec![parser.parse_batch(&raw).unwrap()]);
//!
//! let histogram = weekday_histogram(&table);
//! assert_eq!(histogram.counts[0], 1); // Monday
//! ```

use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{ParseError, PipelineError, RequestFailure};

pub mod polyline;

pub mod geo_utils;

pub mod resources;
pub use resources::{CategoryTable, CountryTable};

pub mod geocode;
pub use geocode::{CoordinateKey, GeocodeCache, GeocodeConfig, ReverseGeocoder, UNDEFINED_COUNTRY};

pub mod activity;
pub use activity::{
    ActivityParser, ApiFault, ConsolidatedTable, Page, ParsedActivity, RawActivity, RawMap,
    SOURCE_APP,
};

pub mod pipeline;
pub use pipeline::{
    ActivitySource, Ingestion, Message, Pipeline, PipelineConfig, Signal, StageReport, WorkerExit,
};

pub mod aggregate;
pub use aggregate::{
    category_rollup, hour_dial, project_routes, weekday_histogram, weekly_timeline,
    CategoryCount, DialConfig, DialPoint, GeometryConfig, HourDial, MapView, RouteProjection,
    TimelineConfig, WeekBucket, WeekdayHistogram, WeeklyTimeline,
};

// HTTP module with retry/backoff
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{HttpClient, HttpConfig, RetryConfig};

#[cfg(feature = "http")]
pub use geocode::NominatimGeocoder;

// Strava API access and one-call ingestion
#[cfg(feature = "http")]
pub mod strava;

#[cfg(feature = "http")]
pub use strava::{ingest, Endpoints, IngestConfig, OAuthCredentials, StravaClient, TokenGrant};

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use activity_mapper::GpsPoint;
/// let point = GpsPoint::new(51.5074, -0.1278); // London
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Bounding box for a set of points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from GPS points.
    pub fn from_points(points: &[GpsPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        Some(geo_utils::compute_bounds(points))
    }

    /// Area of the box in square degrees.
    pub fn area_deg2(&self) -> f64 {
        (self.max_lat - self.min_lat) * (self.max_lng - self.min_lng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gps_point_validation() {
        assert!(GpsPoint::new(51.5074, -0.1278).is_valid());
        assert!(!GpsPoint::new(91.0, 0.0).is_valid());
        assert!(!GpsPoint::new(0.0, 181.0).is_valid());
        assert!(!GpsPoint::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_bounds_from_points() {
        assert!(Bounds::from_points(&[]).is_none());

        let bounds = Bounds::from_points(&[
            GpsPoint::new(52.0, 4.0),
            GpsPoint::new(53.0, 6.0),
        ])
        .unwrap();
        assert_eq!(bounds.min_lat, 52.0);
        assert_eq!(bounds.max_lng, 6.0);
        assert_eq!(bounds.area_deg2(), 2.0);
    }
}
