//! Static lookup tables: country codes and sport-type categories.
//!
//! Both tables ship embedded in the crate and can also be loaded from a file so
//! a deployment can override them.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

const EMBEDDED_COUNTRIES: &str = include_str!("../resources/country_codes.txt");
const EMBEDDED_CATEGORIES: &str = include_str!("../resources/strava_categories.txt");

/// Maps ISO 3166-1 alpha-2 codes to display names.
///
/// File format: one `CODE Name` pair per line; blank lines and lines starting
/// with `#` are ignored.
#[derive(Debug, Clone, Default)]
pub struct CountryTable {
    names: HashMap<String, String>,
}

impl CountryTable {
    /// Parse the `CODE Name` format.
    pub fn parse(text: &str) -> Self {
        let names = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once(char::is_whitespace))
            .map(|(code, name)| (code.to_uppercase(), name.trim().to_string()))
            .collect();
        Self { names }
    }

    /// The table compiled into the crate.
    pub fn embedded() -> Self {
        Self::parse(EMBEDDED_COUNTRIES)
    }

    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    /// Display name for a code, case-insensitive.
    pub fn name(&self, code: &str) -> Option<&str> {
        self.names.get(&code.to_uppercase()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Many-to-one mapping from Strava `sport_type` strings to dashboard categories.
///
/// File format: sections separated by two blank lines. Each section is the
/// category name, one blank line, then one sport type per line:
///
/// ```text
/// Running
///
/// Run
/// TrailRun
///
///
/// Cycling
///
/// Ride
/// ```
#[derive(Debug, Clone, Default)]
pub struct CategoryTable {
    categories: HashMap<String, String>,
    fallback: String,
}

impl CategoryTable {
    /// Parse the sectioned format. Unmapped sport types fall back to `""`.
    pub fn parse(text: &str) -> Self {
        let text = text.replace("\r\n", "\n");
        let mut categories = HashMap::new();

        for section in text.split("\n\n\n") {
            let Some((category, sport_types)) = section.trim_matches('\n').split_once("\n\n") else {
                continue;
            };
            let category = category.trim();
            for sport_type in sport_types.lines().map(str::trim).filter(|s| !s.is_empty()) {
                categories.insert(sport_type.to_string(), category.to_string());
            }
        }

        Self {
            categories,
            fallback: String::new(),
        }
    }

    /// The table compiled into the crate.
    pub fn embedded() -> Self {
        Self::parse(EMBEDDED_CATEGORIES)
    }

    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    /// Replace the category returned for unmapped sport types.
    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    /// Category for a sport type, or the fallback when it is not mapped.
    pub fn category(&self, sport_type: &str) -> &str {
        self.categories
            .get(sport_type)
            .map_or(self.fallback.as_str(), String::as_str)
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}
