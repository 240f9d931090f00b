//! Reverse geocoding with a quantized, shared cache.
//!
//! Activities mostly start from a handful of places, so coordinates are rounded
//! to a coarse grid before lookup and every distinct grid cell costs at most one
//! external request per process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::RwLock;

use crate::error::RequestFailure;
use crate::resources::CountryTable;

/// Country stored for coordinates the geocoder could not place.
pub const UNDEFINED_COUNTRY: &str = "undefined";

/// External reverse-geocoding service.
///
/// Receives the quantized coordinate strings that form the cache key, so the
/// request sent upstream matches exactly what was cached.
pub trait ReverseGeocoder: Send + Sync {
    /// ISO alpha-2 country code for the coordinate, if the service resolved one.
    fn country_code(&self, lat: &str, lon: &str) -> Result<Option<String>, RequestFailure>;
}

/// Configuration for the geocode cache.
#[derive(Debug, Clone)]
pub struct GeocodeConfig {
    /// Decimal places kept in the cache key.
    /// Default: 1 (cells of roughly 11 km)
    pub precision: usize,
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self { precision: 1 }
    }
}

/// Cache key: both coordinates formatted to a fixed number of decimals.
///
/// Formatting (rather than rounding floats) keeps the key zero-padded, so
/// `52.0` and `52.04` both become `"52.0"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CoordinateKey {
    pub lat: String,
    pub lon: String,
}

impl CoordinateKey {
    pub fn quantize(lat: f64, lon: f64, precision: usize) -> Self {
        Self {
            lat: format_coordinate(lat, precision),
            lon: format_coordinate(lon, precision),
        }
    }
}

/// Values that round to zero format as `"0.0"`, never `"-0.0"`.
fn format_coordinate(value: f64, precision: usize) -> String {
    let formatted = format!("{value:.precision$}");
    match formatted.strip_prefix('-') {
        Some(magnitude) if magnitude.bytes().all(|b| b == b'0' || b == b'.') => magnitude.to_string(),
        _ => formatted,
    }
}

/// Memoizing country resolver shared by all parser workers.
pub struct GeocodeCache {
    geocoder: Arc<dyn ReverseGeocoder>,
    countries: CountryTable,
    precision: usize,
    entries: RwLock<HashMap<CoordinateKey, String>>,
    lookups: AtomicU64,
}

impl GeocodeCache {
    pub fn new(
        geocoder: Arc<dyn ReverseGeocoder>,
        countries: CountryTable,
        config: &GeocodeConfig,
    ) -> Self {
        Self {
            geocoder,
            countries,
            precision: config.precision,
            entries: RwLock::new(HashMap::new()),
            lookups: AtomicU64::new(0),
        }
    }

    /// Country display name for a coordinate, or [`UNDEFINED_COUNTRY`].
    ///
    /// A miss calls the geocoder once and stores the answer, including negative
    /// answers and failures. The lock is not held during the external call: two
    /// workers missing the same key at once may both look it up, and whichever
    /// stores first wins.
    pub fn resolve_country(&self, lat: f64, lon: f64) -> String {
        let key = CoordinateKey::quantize(lat, lon, self.precision);

        if let Some(country) = self.entries.read().get(&key) {
            return country.clone();
        }

        debug!("[GeocodeCache] miss for ({}, {})", key.lat, key.lon);
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let country = self.lookup(&key);

        self.entries.write().entry(key).or_insert(country).clone()
    }

    fn lookup(&self, key: &CoordinateKey) -> String {
        match self.geocoder.country_code(&key.lat, &key.lon) {
            Ok(Some(code)) => self
                .countries
                .name(&code)
                .unwrap_or(UNDEFINED_COUNTRY)
                .to_string(),
            Ok(None) => UNDEFINED_COUNTRY.to_string(),
            Err(e) => {
                warn!(
                    "[GeocodeCache] lookup for ({}, {}) failed: {}",
                    key.lat, key.lon, e
                );
                UNDEFINED_COUNTRY.to_string()
            }
        }
    }

    /// Number of external lookups issued so far.
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Nominatim (`/reverse?lat=..&lon=..&format=json`) geocoder.
#[cfg(feature = "http")]
pub struct NominatimGeocoder {
    http: Arc<crate::http::HttpClient>,
    url: String,
}

#[cfg(feature = "http")]
impl NominatimGeocoder {
    pub const DEFAULT_URL: &'static str = "https://nominatim.openstreetmap.org/reverse";

    pub fn new(http: Arc<crate::http::HttpClient>, url: impl Into<String>) -> Self {
        Self { http, url: url.into() }
    }
}

#[cfg(feature = "http")]
impl ReverseGeocoder for NominatimGeocoder {
    fn country_code(&self, lat: &str, lon: &str) -> Result<Option<String>, RequestFailure> {
        let params = [
            ("lat", lat.to_string()),
            ("lon", lon.to_string()),
            ("format", "json".to_string()),
        ];
        let response = self.http.get(&self.url, &params, &[])?;

        Ok(response
            .get("address")
            .and_then(|address| address.get("country_code"))
            .and_then(serde_json::Value::as_str)
            .map(str::to_uppercase))
    }
}
