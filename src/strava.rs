//! Strava API access: OAuth token handling, the paginated activities source,
//! and [`ingest`], which wires HTTP, geocoding and the pipeline together.

use std::env;
use std::sync::Arc;

use log::info;
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;

use crate::activity::{ActivityParser, ConsolidatedTable, Page};
use crate::error::{PipelineError, RequestFailure};
use crate::geocode::{GeocodeCache, GeocodeConfig, NominatimGeocoder};
use crate::http::{HttpClient, HttpConfig};
use crate::pipeline::{ActivitySource, Pipeline, PipelineConfig};
use crate::resources::CountryTable;

/// Read scopes requested during authorization.
const SCOPE: &str = "activity:read,activity:read_all";

/// Remote endpoints; overridable so tests can point at a mock server.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub authorize: String,
    pub token: String,
    pub athlete: String,
    pub activities: String,
    pub reverse_geocode: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            authorize: "https://www.strava.com/oauth/authorize".to_string(),
            token: "https://www.strava.com/oauth/token".to_string(),
            athlete: "https://www.strava.com/api/v3/athlete".to_string(),
            activities: "https://www.strava.com/api/v3/athlete/activities".to_string(),
            reverse_geocode: NominatimGeocoder::DEFAULT_URL.to_string(),
        }
    }
}

// ============================================================================
// OAuth
// ============================================================================

/// Registered application credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl OAuthCredentials {
    pub const CLIENT_ID_VAR: &'static str = "STRAVA_CLIENT_ID";
    pub const CLIENT_SECRET_VAR: &'static str = "STRAVA_CLIENT_SECRET";

    /// Read `STRAVA_CLIENT_ID` and `STRAVA_CLIENT_SECRET`; `None` if either is unset.
    pub fn from_env() -> Option<Self> {
        Some(Self {
            client_id: env::var(Self::CLIENT_ID_VAR).ok()?,
            client_secret: env::var(Self::CLIENT_SECRET_VAR).ok()?,
        })
    }

    /// Page the athlete visits to grant read access; Strava redirects back to
    /// `redirect_uri` with a `code` parameter.
    pub fn authorize_url(&self, endpoints: &Endpoints, redirect_uri: &str) -> Result<String, RequestFailure> {
        Url::parse_with_params(
            &endpoints.authorize,
            &[
                ("client_id", self.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", redirect_uri),
                ("approval_prompt", "force"),
                ("scope", SCOPE),
            ],
        )
        .map(String::from)
        .map_err(|e| RequestFailure::Malformed(format!("invalid authorize URL: {e}")))
    }
}

/// Tokens plus the athlete they belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// `"{firstname} {lastname}"`, trimmed
    pub athlete_name: String,
    /// Account creation time as sent by the API
    pub created_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Athlete {
    #[serde(default)]
    firstname: Option<String>,
    #[serde(default)]
    lastname: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

impl Athlete {
    fn display_name(&self) -> String {
        format!(
            "{} {}",
            self.firstname.as_deref().unwrap_or_default(),
            self.lastname.as_deref().unwrap_or_default()
        )
        .trim()
        .to_string()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    athlete: Option<Athlete>,
}

fn decode<T: for<'de> Deserialize<'de>>(body: Value) -> Result<T, RequestFailure> {
    serde_json::from_value(body).map_err(|e| RequestFailure::Malformed(e.to_string()))
}

/// Trade an authorization code for tokens.
pub fn exchange_code(
    http: &HttpClient,
    endpoints: &Endpoints,
    credentials: &OAuthCredentials,
    code: &str,
) -> Result<TokenGrant, RequestFailure> {
    let body = http.post(
        &endpoints.token,
        &[
            ("client_id", credentials.client_id.clone()),
            ("client_secret", credentials.client_secret.clone()),
            ("code", code.to_string()),
            ("grant_type", "authorization_code".to_string()),
        ],
    )?;
    let response: TokenResponse = decode(body)?;
    let athlete = response.athlete.unwrap_or_default();

    info!("[OAuth] authorized athlete {:?}", athlete.display_name());
    Ok(TokenGrant {
        access_token: response.access_token,
        refresh_token: response.refresh_token,
        athlete_name: athlete.display_name(),
        created_at: athlete.created_at,
    })
}

/// Obtain a fresh access token; the refresh response carries no athlete, so
/// the athlete endpoint is queried with the new token.
pub fn refresh(
    http: &HttpClient,
    endpoints: &Endpoints,
    credentials: &OAuthCredentials,
    refresh_token: &str,
) -> Result<TokenGrant, RequestFailure> {
    let body = http.post(
        &endpoints.token,
        &[
            ("client_id", credentials.client_id.clone()),
            ("client_secret", credentials.client_secret.clone()),
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
        ],
    )?;
    let response: TokenResponse = decode(body)?;

    let athlete: Athlete = decode(http.get(
        &endpoints.athlete,
        &[],
        &[("Authorization", bearer(&response.access_token))],
    )?)?;

    Ok(TokenGrant {
        access_token: response.access_token,
        refresh_token: response.refresh_token,
        athlete_name: athlete.display_name(),
        created_at: athlete.created_at,
    })
}

fn bearer(access_token: &str) -> String {
    format!("Bearer {access_token}")
}

// ============================================================================
// Activities
// ============================================================================

/// `GET /athlete/activities` as an [`ActivitySource`].
pub struct StravaClient {
    http: Arc<HttpClient>,
    url: String,
    authorization: String,
}

impl StravaClient {
    pub fn new(http: Arc<HttpClient>, access_token: &str) -> Self {
        Self {
            http,
            url: Endpoints::default().activities,
            authorization: bearer(access_token),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

impl ActivitySource for StravaClient {
    fn fetch_page(&self, page: u32, per_page: u32) -> Result<Page, RequestFailure> {
        let body = self.http.get(
            &self.url,
            &[("per_page", per_page.to_string()), ("page", page.to_string())],
            &[("Authorization", self.authorization.clone())],
        )?;
        Page::from_json(body).map_err(|e| RequestFailure::Malformed(e.to_string()))
    }
}

// ============================================================================
// One-call Ingestion
// ============================================================================

/// Everything [`ingest`] needs besides the access token.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub http: HttpConfig,
    pub pipeline: PipelineConfig,
    pub geocode: GeocodeConfig,
    pub endpoints: Endpoints,
    pub countries: CountryTable,

    /// Reverse-geocode start points into country names.
    /// Default: true
    pub resolve_countries: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            pipeline: PipelineConfig::default(),
            geocode: GeocodeConfig::default(),
            endpoints: Endpoints::default(),
            countries: CountryTable::embedded(),
            resolve_countries: true,
        }
    }
}

/// Fetch and parse the athlete's whole activity history.
///
/// Builds one HTTP client shared by the activities source and the geocoder,
/// and a fresh geocode cache for this run.
pub fn ingest(access_token: &str, config: &IngestConfig) -> Result<ConsolidatedTable, PipelineError> {
    let http = Arc::new(HttpClient::new(config.http.clone())?);

    let parser = if config.resolve_countries {
        let geocoder = Arc::new(NominatimGeocoder::new(
            Arc::clone(&http),
            config.endpoints.reverse_geocode.clone(),
        ));
        let cache = GeocodeCache::new(geocoder, config.countries.clone(), &config.geocode);
        ActivityParser::new(Arc::new(cache))
    } else {
        ActivityParser::without_geocoding()
    };

    let source = StravaClient::new(http, access_token).with_url(config.endpoints.activities.clone());
    Pipeline::new(Arc::new(source), parser, config.pipeline.clone()).ingest()
}
