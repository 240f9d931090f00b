//! Activity records: the raw API shape, the parsed record, and the parser that
//! turns one into the other.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ParseError;
use crate::geo_utils::polyline_length;
use crate::geocode::GeocodeCache;
use crate::polyline::{self, STRAVA_PRECISION};
use crate::GpsPoint;

/// Label attached to every record produced by this parser.
pub const SOURCE_APP: &str = "Strava";

/// Public page of a single activity on strava.com.
const ACTIVITY_LINK: &str = "https://www.strava.com/activities/";

// ============================================================================
// Raw API Types
// ============================================================================

/// One activity object as returned by `GET /athlete/activities`.
///
/// Only the fields the parser reads are modelled; everything else in the
/// payload is ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawActivity {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub start_date_local: Option<String>,
    #[serde(default)]
    pub sport_type: Option<String>,
    #[serde(default, rename = "type")]
    pub activity_type: Option<String>,
    #[serde(default)]
    pub map: Option<RawMap>,
    /// `[lat, lng]`, or `[]` for activities recorded without GPS
    #[serde(default)]
    pub start_latlng: Option<Vec<f64>>,
    #[serde(default)]
    pub moving_time: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMap {
    #[serde(default)]
    pub summary_polyline: Option<String>,
}

impl RawActivity {
    /// True for `{}`: an object carrying none of the modelled fields.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Start coordinate, if a full `[lat, lng]` pair is present.
    pub fn start_point(&self) -> Option<GpsPoint> {
        match self.start_latlng.as_deref() {
            Some([lat, lng, ..]) => Some(GpsPoint::new(*lat, *lng)).filter(GpsPoint::is_valid),
            _ => None,
        }
    }

    /// Encoded route, if present and non-empty.
    pub fn encoded_route(&self) -> Option<&str> {
        self.map
            .as_ref()
            .and_then(|map| map.summary_polyline.as_deref())
            .filter(|encoded| !encoded.is_empty())
    }
}

/// Error object the activities endpoint sends instead of a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiFault {
    pub status: Option<String>,
    pub reason: String,
}

impl fmt::Display for ApiFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            Some(status) => write!(f, "{status}: {}", self.reason),
            None => f.write_str(&self.reason),
        }
    }
}

/// One response of the paginated activities endpoint.
///
/// A page is either a list of activities (possibly empty) or an error object;
/// the two are told apart by JSON shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Page {
    Activities(Vec<RawActivity>),
    Fault(ApiFault),
}

impl Page {
    /// Classify a decoded response body.
    ///
    /// Arrays become [`Page::Activities`]; objects become [`Page::Fault`], with
    /// the reason taken from `reason` or `message` (Strava's own error field).
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        match value {
            Value::Array(_) => Ok(Self::Activities(serde_json::from_value(value)?)),
            Value::Object(object) => {
                let status = object.get("status").map(|status| match status {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
                let reason = object
                    .get("reason")
                    .or_else(|| object.get("message"))
                    .and_then(Value::as_str)
                    .map_or_else(|| Value::Object(object.clone()).to_string(), str::to_string);
                Ok(Self::Fault(ApiFault { status, reason }))
            }
            other => Ok(Self::Fault(ApiFault {
                status: None,
                reason: format!("unexpected response body: {other}"),
            })),
        }
    }

    /// Number of activities on the page; 0 for a fault.
    pub fn len(&self) -> usize {
        match self {
            Self::Activities(activities) => activities.len(),
            Self::Fault(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Parsed Record
// ============================================================================

/// An activity broken down for analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedActivity {
    pub id: Option<u64>,
    pub name: String,
    /// Local start time as recorded by the device
    pub start: NaiveDateTime,
    /// Calendar year of `start`
    pub year: i32,
    /// ISO 8601 week number (1-53)
    pub week: u32,
    /// 0 = Monday ... 6 = Sunday
    pub weekday: u32,
    pub hour: u32,
    pub minute: u32,
    /// `"{iso_year}-{week}"`, the timeline bucket
    pub calendar_week: String,
    pub sport_type: String,
    /// Legacy coarse activity type (`Run`, `Ride`, ...)
    pub activity_type: Option<String>,
    pub moving_time: Option<u64>,
    /// Decoded route; empty for activities without GPS
    pub route: Vec<GpsPoint>,
    /// Haversine length of `route` in meters
    pub route_length_m: f64,
    /// Always present when `route` is non-empty
    pub start_point: Option<GpsPoint>,
    pub country: Option<String>,
    pub app: &'static str,
}

impl ParsedActivity {
    pub fn date(&self) -> NaiveDate {
        self.start.date()
    }

    /// Link to the activity on strava.com.
    pub fn url(&self) -> Option<String> {
        self.id.map(|id| format!("{ACTIVITY_LINK}{id}"))
    }
}

// ============================================================================
// Parser
// ============================================================================

/// Turns raw activities into [`ParsedActivity`] records.
///
/// The geocode cache is shared: every parser worker holds the same `Arc`.
#[derive(Clone)]
pub struct ActivityParser {
    geocoder: Option<Arc<GeocodeCache>>,
    precision: u32,
}

impl ActivityParser {
    pub fn new(geocoder: Arc<GeocodeCache>) -> Self {
        Self {
            geocoder: Some(geocoder),
            precision: STRAVA_PRECISION,
        }
    }

    /// Parser that leaves `country` empty instead of geocoding.
    pub fn without_geocoding() -> Self {
        Self {
            geocoder: None,
            precision: STRAVA_PRECISION,
        }
    }

    /// Parse one activity.
    pub fn parse(&self, raw: &RawActivity) -> Result<ParsedActivity, ParseError> {
        let start = start_time(raw)?;
        let iso = start.iso_week();

        let route = self.decode_route(raw);
        // A decoded route anchors the start point when the API omitted it
        let start_point = raw.start_point().or_else(|| route.first().copied());

        let country = match (&self.geocoder, start_point) {
            (Some(cache), Some(point)) => {
                Some(cache.resolve_country(point.latitude, point.longitude))
            }
            _ => None,
        };

        Ok(ParsedActivity {
            id: raw.id,
            name: raw.name.clone().unwrap_or_default(),
            start,
            year: start.year(),
            week: iso.week(),
            weekday: start.weekday().num_days_from_monday(),
            hour: start.hour(),
            minute: start.minute(),
            calendar_week: format!("{}-{}", iso.year(), iso.week()),
            sport_type: raw.sport_type.clone().unwrap_or_default(),
            activity_type: raw.activity_type.clone(),
            moving_time: raw.moving_time,
            route_length_m: polyline_length(&route),
            route,
            start_point,
            country,
            app: SOURCE_APP,
        })
    }

    /// Parse a batch in order.
    ///
    /// `{}` placeholders are skipped, so a batch consisting only of them yields
    /// an empty result rather than an error.
    pub fn parse_batch(&self, raws: &[RawActivity]) -> Result<Vec<ParsedActivity>, ParseError> {
        raws.iter()
            .filter(|raw| !raw.is_empty())
            .map(|raw| self.parse(raw))
            .collect()
    }

    /// Parse a page; an error-object page yields no activities.
    pub fn parse_page(&self, page: &Page) -> Result<Vec<ParsedActivity>, ParseError> {
        match page {
            Page::Activities(raws) => self.parse_batch(raws),
            Page::Fault(fault) => {
                debug!("[ActivityParser] fault page ({fault}) parsed as empty");
                Ok(Vec::new())
            }
        }
    }

    fn decode_route(&self, raw: &RawActivity) -> Vec<GpsPoint> {
        let Some(encoded) = raw.encoded_route() else {
            return Vec::new();
        };

        polyline::decode(encoded, self.precision).unwrap_or_else(|e| {
            warn!("[ActivityParser] activity {:?}: dropping route, {}", raw.id, e);
            Vec::new()
        })
    }
}

/// Read `start_date_local`.
///
/// Strava suffixes local times with `Z` even though they carry no zone; the
/// wall-clock value is kept as-is.
fn start_time(raw: &RawActivity) -> Result<NaiveDateTime, ParseError> {
    let value = raw
        .start_date_local
        .as_deref()
        .ok_or(ParseError::MissingTimestamp { id: raw.id })?;

    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.naive_local())
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S"))
        .map_err(|_| ParseError::InvalidTimestamp {
            id: raw.id,
            value: value.to_string(),
        })
}

// ============================================================================
// Consolidated Table
// ============================================================================

/// All parsed activities of one ingestion run, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConsolidatedTable {
    activities: Vec<ParsedActivity>,
}

impl ConsolidatedTable {
    /// Concatenate batches (in any order) and sort by start time.
    ///
    /// The sort is stable, so activities with identical start times keep the
    /// order they arrived in.
    pub fn from_batches(batches: Vec<Vec<ParsedActivity>>) -> Self {
        let mut activities: Vec<ParsedActivity> = batches.into_iter().flatten().collect();
        activities.sort_by_key(|activity| activity.start);
        Self { activities }
    }

    pub fn activities(&self) -> &[ParsedActivity] {
        &self.activities
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ParsedActivity> {
        self.activities.iter()
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    pub fn into_inner(self) -> Vec<ParsedActivity> {
        self.activities
    }
}

impl<'a> IntoIterator for &'a ConsolidatedTable {
    type Item = &'a ParsedActivity;
    type IntoIter = std::slice::Iter<'a, ParsedActivity>;

    fn into_iter(self) -> Self::IntoIter {
        self.activities.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocode::{GeocodeConfig, ReverseGeocoder};
    use crate::resources::CountryTable;
    use crate::RequestFailure;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedGeocoder {
        calls: AtomicUsize,
    }

    impl ReverseGeocoder for FixedGeocoder {
        fn country_code(&self, _lat: &str, _lon: &str) -> Result<Option<String>, RequestFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some("us".to_string()))
        }
    }

    fn raw(value: Value) -> RawActivity {
        serde_json::from_value(value).unwrap()
    }

    fn sample() -> RawActivity {
        raw(json!({
            "id": 154504250376u64,
            "name": "Happy Friday",
            "type": "Ride",
            "sport_type": "MountainBikeRide",
            "start_date_local": "2018-05-04T12:15:09Z",
            "moving_time": 4207,
            "start_latlng": [38.5, -120.2],
            "map": {"id": "a12345678908766", "summary_polyline": "_p~iF~ps|U_ulLnnqC_mqNvxq`@"},
            "kudos_count": 19
        }))
    }

    #[test]
    fn test_parse_temporal_breakdown() {
        let parsed = ActivityParser::without_geocoding().parse(&sample()).unwrap();

        assert_eq!(parsed.id, Some(154504250376));
        assert_eq!(parsed.name, "Happy Friday");
        assert_eq!(parsed.year, 2018);
        assert_eq!(parsed.week, 18);
        assert_eq!(parsed.weekday, 4); // Friday
        assert_eq!(parsed.hour, 12);
        assert_eq!(parsed.minute, 15);
        assert_eq!(parsed.calendar_week, "2018-18");
        assert_eq!(parsed.sport_type, "MountainBikeRide");
        assert_eq!(parsed.activity_type.as_deref(), Some("Ride"));
        assert_eq!(parsed.moving_time, Some(4207));
        assert_eq!(parsed.app, SOURCE_APP);
        assert_eq!(parsed.country, None);
        assert_eq!(
            parsed.url().as_deref(),
            Some("https://www.strava.com/activities/154504250376")
        );
    }

    #[test]
    fn test_parse_decodes_route() {
        let parsed = ActivityParser::without_geocoding().parse(&sample()).unwrap();

        assert_eq!(parsed.route.len(), 3);
        assert_eq!(parsed.route[0], GpsPoint::new(38.5, -120.2));
        assert_eq!(parsed.route[2], GpsPoint::new(43.252, -126.453));
        assert_eq!(parsed.start_point, Some(GpsPoint::new(38.5, -120.2)));
        assert!(parsed.route_length_m > 500_000.0);
    }

    #[test]
    fn test_calendar_week_uses_iso_year() {
        // 2024-12-30 is Monday of ISO week 1 of 2025
        let activity = raw(json!({"id": 1, "start_date_local": "2024-12-30T08:00:00Z"}));
        let parsed = ActivityParser::without_geocoding().parse(&activity).unwrap();

        assert_eq!(parsed.year, 2024);
        assert_eq!(parsed.week, 1);
        assert_eq!(parsed.calendar_week, "2025-1");
        assert_eq!(parsed.weekday, 0);
    }

    #[test]
    fn test_parse_without_gps() {
        let activity = raw(json!({
            "id": 2,
            "name": "Treadmill",
            "sport_type": "Run",
            "start_date_local": "2024-01-07T18:40:00Z",
            "start_latlng": [],
            "map": {"summary_polyline": ""}
        }));
        let geocoder = Arc::new(FixedGeocoder { calls: AtomicUsize::new(0) });
        let cache = Arc::new(GeocodeCache::new(
            geocoder.clone(),
            CountryTable::embedded(),
            &GeocodeConfig::default(),
        ));
        let parsed = ActivityParser::new(cache).parse(&activity).unwrap();

        assert!(parsed.route.is_empty());
        assert_eq!(parsed.start_point, None);
        assert_eq!(parsed.country, None);
        assert_eq!(parsed.weekday, 6);
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_parse_resolves_country() {
        let geocoder = Arc::new(FixedGeocoder { calls: AtomicUsize::new(0) });
        let cache = Arc::new(GeocodeCache::new(
            geocoder.clone(),
            CountryTable::embedded(),
            &GeocodeConfig::default(),
        ));
        let parsed = ActivityParser::new(cache).parse(&sample()).unwrap();

        assert_eq!(parsed.country.as_deref(), Some("United States"));
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_out_of_range_start_point_falls_back_to_route() {
        let activity = raw(json!({
            "id": 4,
            "start_date_local": "2024-01-07T18:40:00Z",
            "start_latlng": [138.5, -120.2],
            "map": {"summary_polyline": "_p~iF~ps|U_ulLnnqC"}
        }));
        let parsed = ActivityParser::without_geocoding().parse(&activity).unwrap();

        assert_eq!(parsed.start_point, Some(GpsPoint::new(38.5, -120.2)));
    }

    #[test]
    fn test_route_anchors_missing_start_point() {
        let activity = raw(json!({
            "id": 3,
            "start_date_local": "2024-01-07T18:40:00Z",
            "map": {"summary_polyline": "_p~iF~ps|U_ulLnnqC"}
        }));
        let parsed = ActivityParser::without_geocoding().parse(&activity).unwrap();

        assert_eq!(parsed.route.len(), 2);
        assert_eq!(parsed.start_point, Some(GpsPoint::new(38.5, -120.2)));
    }

    #[test]
    fn test_malformed_polyline_drops_route() {
        let activity = raw(json!({
            "id": 4,
            "start_date_local": "2024-01-07T18:40:00Z",
            "start_latlng": [52.0, 4.0],
            "map": {"summary_polyline": "_p~iF"}
        }));
        let parsed = ActivityParser::without_geocoding().parse(&activity).unwrap();

        assert!(parsed.route.is_empty());
        assert_eq!(parsed.start_point, Some(GpsPoint::new(52.0, 4.0)));
    }

    #[test]
    fn test_timestamp_formats() {
        let parser = ActivityParser::without_geocoding();
        for value in ["2024-05-01T06:30:00Z", "2024-05-01T06:30:00", "2024-05-01 06:30:00"] {
            let parsed = parser
                .parse(&raw(json!({"id": 5, "start_date_local": value})))
                .unwrap();
            assert_eq!((parsed.hour, parsed.minute), (6, 30));
        }
    }

    #[test]
    fn test_missing_timestamp_is_error() {
        let parser = ActivityParser::without_geocoding();
        assert_eq!(
            parser.parse(&raw(json!({"id": 6}))),
            Err(ParseError::MissingTimestamp { id: Some(6) })
        );
        assert!(matches!(
            parser.parse(&raw(json!({"id": 7, "start_date_local": "yesterday"}))),
            Err(ParseError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn test_empty_batches_parse_to_nothing() {
        let parser = ActivityParser::without_geocoding();

        assert!(parser.parse_batch(&[]).unwrap().is_empty());
        assert!(parser.parse_batch(&[RawActivity::default()]).unwrap().is_empty());

        let fault = Page::Fault(ApiFault {
            status: Some("401".to_string()),
            reason: "Unauthorized".to_string(),
        });
        assert!(parser.parse_page(&fault).unwrap().is_empty());
    }

    #[test]
    fn test_page_from_json_shapes() {
        let page = Page::from_json(json!([{"id": 1}, {"id": 2}])).unwrap();
        assert_eq!(page.len(), 2);

        assert_eq!(Page::from_json(json!([])).unwrap(), Page::Activities(vec![]));

        let page = Page::from_json(json!({"status": 429, "reason": "Too Many Requests"})).unwrap();
        assert_eq!(
            page,
            Page::Fault(ApiFault {
                status: Some("429".to_string()),
                reason: "Too Many Requests".to_string(),
            })
        );

        let page = Page::from_json(json!({"message": "Authorization Error", "errors": []})).unwrap();
        assert!(matches!(page, Page::Fault(ApiFault { status: None, ref reason }) if reason == "Authorization Error"));
        assert!(page.is_empty());
    }

    #[test]
    fn test_table_sorted_by_start() {
        let parser = ActivityParser::without_geocoding();
        let late = parser
            .parse(&raw(json!({"id": 1, "start_date_local": "2024-02-01T10:00:00Z"})))
            .unwrap();
        let early = parser
            .parse(&raw(json!({"id": 2, "start_date_local": "2023-02-01T10:00:00Z"})))
            .unwrap();
        let middle = parser
            .parse(&raw(json!({"id": 3, "start_date_local": "2023-08-01T10:00:00Z"})))
            .unwrap();

        let table = ConsolidatedTable::from_batches(vec![vec![late], vec![], vec![early, middle]]);
        let ids: Vec<_> = table.iter().filter_map(|a| a.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }
}
