//! # Dashboard Aggregators
//!
//! Pure functions over a [`ConsolidatedTable`], one per dashboard view.
//!
//! | Function | View |
//! |----------|------|
//! | [`weekly_timeline`] | Activities per ISO week plus a per-activity stacking position |
//! | [`weekday_histogram`] | Share of activities per weekday |
//! | [`hour_dial`] | Start times on a 24h polar dial |
//! | [`category_rollup`] | Activities per sport category |
//! | [`project_routes`] | All routes as one flat coordinate list with gaps |
//!
//! All of them expect the table sorted by start time, which
//! [`ConsolidatedTable::from_batches`] guarantees.

use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;

use crate::activity::{ConsolidatedTable, ParsedActivity};
use crate::geo_utils::{median_center, zoom_for_area};
use crate::resources::CategoryTable;
use crate::{Bounds, GpsPoint};

// ============================================================================
// Weekly Timeline
// ============================================================================

/// Configuration for [`weekly_timeline`].
#[derive(Debug, Clone, Default)]
pub struct TimelineConfig {
    /// Emit zero-count buckets for inactive weeks between the first and the
    /// last active week.
    /// Default: false
    pub fill_missing_weeks: bool,
}

/// Activities of one ISO week.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeekBucket {
    /// `"{iso_year}-{week}"`
    pub key: String,
    pub iso_year: i32,
    pub week: u32,
    /// Monday the week starts on
    pub week_start: NaiveDate,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WeeklyTimeline {
    /// Chronological
    pub buckets: Vec<WeekBucket>,
    /// Per activity (table order): zero-based index among the activities of
    /// its week, used to stack markers on top of the week's bar.
    pub positions: Vec<usize>,
}

pub fn weekly_timeline(table: &ConsolidatedTable, config: &TimelineConfig) -> WeeklyTimeline {
    let mut positions = Vec::with_capacity(table.len());
    let mut buckets: BTreeMap<NaiveDate, WeekBucket> = BTreeMap::new();
    let mut current: Option<&str> = None;
    let mut position = 0;

    for activity in table {
        // Sorted input: a new key means a new week
        if current == Some(activity.calendar_week.as_str()) {
            position += 1;
        } else {
            current = Some(activity.calendar_week.as_str());
            position = 0;
        }
        positions.push(position);

        let week_start = week_start(activity);
        buckets
            .entry(week_start)
            .or_insert_with(|| bucket(week_start, 0))
            .count += 1;
    }

    if config.fill_missing_weeks {
        fill_gaps(&mut buckets);
    }

    WeeklyTimeline {
        buckets: buckets.into_values().collect(),
        positions,
    }
}

fn week_start(activity: &ParsedActivity) -> NaiveDate {
    activity.date() - Duration::days(i64::from(activity.weekday))
}

fn bucket(week_start: NaiveDate, count: usize) -> WeekBucket {
    let iso = week_start.iso_week();
    WeekBucket {
        key: format!("{}-{}", iso.year(), iso.week()),
        iso_year: iso.year(),
        week: iso.week(),
        week_start,
        count,
    }
}

fn fill_gaps(buckets: &mut BTreeMap<NaiveDate, WeekBucket>) {
    let (Some(&first), Some(&last)) = (buckets.keys().next(), buckets.keys().next_back()) else {
        return;
    };

    let mut monday = first;
    while monday < last {
        monday = monday + Duration::weeks(1);
        buckets.entry(monday).or_insert_with(|| bucket(monday, 0));
    }
}

// ============================================================================
// Weekday Histogram
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WeekdayHistogram {
    /// Index 0 = Monday
    pub counts: [usize; 7],
    /// Share of all activities, 0-100; all zero for an empty table
    pub percentages: [f64; 7],
    pub total: usize,
}

pub fn weekday_histogram(table: &ConsolidatedTable) -> WeekdayHistogram {
    let mut counts = [0usize; 7];
    for activity in table {
        counts[activity.weekday as usize % 7] += 1;
    }

    let total = table.len();
    let mut percentages = [0.0; 7];
    if total > 0 {
        for (pct, count) in percentages.iter_mut().zip(counts) {
            *pct = count as f64 * 100.0 / total as f64;
        }
    }

    WeekdayHistogram { counts, percentages, total }
}

// ============================================================================
// Hour-of-Day Dial
// ============================================================================

/// Configuration for [`hour_dial`].
#[derive(Debug, Clone)]
pub struct DialConfig {
    /// Minutes are truncated to multiples of this before conversion.
    /// Default: 10
    pub minute_step: u32,

    /// Default: 15.0 (24 hours around 360 degrees)
    pub degrees_per_hour: f64,

    /// Degrees added per minute step.
    /// Default: 2.5
    pub degrees_per_step: f64,
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            minute_step: 10,
            degrees_per_hour: 15.0,
            degrees_per_step: 2.5,
        }
    }
}

impl DialConfig {
    /// Dial angle in degrees, midnight at 0.
    ///
    /// ```rust
    /// use activity_mapper::DialConfig;
    ///
    /// let dial = DialConfig::default();
    /// assert_eq!(dial.angle(6, 30), 97.5);
    /// assert_eq!(dial.angle(0, 5), 0.0);
    /// ```
    pub fn angle(&self, hour: u32, minute: u32) -> f64 {
        (f64::from(hour) * self.degrees_per_hour) % 360.0
            + f64::from(minute / self.step()) * self.degrees_per_step
    }

    fn step(&self) -> u32 {
        self.minute_step.max(1)
    }
}

/// One activity on the dial.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DialPoint {
    /// Index into the table
    pub activity: usize,
    pub angle: f64,
    /// 1 for the first activity at this angle, 2 for the second, ...
    pub radius: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HourDial {
    /// Table order
    pub points: Vec<DialPoint>,
}

pub fn hour_dial(table: &ConsolidatedTable, config: &DialConfig) -> HourDial {
    let mut seen: HashMap<(u32, u32), usize> = HashMap::new();

    let points = table
        .iter()
        .enumerate()
        .map(|(index, activity)| {
            let slot = (activity.hour, activity.minute / config.step());
            let radius = seen.entry(slot).or_insert(0);
            *radius += 1;

            DialPoint {
                activity: index,
                angle: config.angle(activity.hour, activity.minute),
                radius: *radius,
            }
        })
        .collect();

    HourDial { points }
}

// ============================================================================
// Category Rollup
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: usize,
}

/// Count activities per category, most frequent first (ties by name).
pub fn category_rollup(table: &ConsolidatedTable, categories: &CategoryTable) -> Vec<CategoryCount> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for activity in table {
        *counts.entry(categories.category(&activity.sport_type)).or_insert(0) += 1;
    }

    let mut rollup: Vec<CategoryCount> = counts
        .into_iter()
        .map(|(category, count)| CategoryCount {
            category: category.to_string(),
            count,
        })
        .collect();
    rollup.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.category.cmp(&b.category)));
    rollup
}

// ============================================================================
// Route Projection
// ============================================================================

/// Configuration for [`project_routes`].
#[derive(Debug, Clone)]
pub struct GeometryConfig {
    /// Prefix each route with the activity's start point.
    /// Default: true
    pub include_start_point: bool,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self { include_start_point: true }
    }
}

/// Initial framing of the map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MapView {
    pub bounds: Bounds,
    /// Median of the start points
    pub center: GpsPoint,
    pub zoom: u8,
}

/// Every route in one flat list, `None` between activities.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RouteProjection {
    pub points: Vec<Option<GpsPoint>>,
    /// Parallel to `points`: the table index each point belongs to
    pub owners: Vec<Option<usize>>,
    /// `None` when no activity has a start point
    pub view: Option<MapView>,
}

pub fn project_routes(table: &ConsolidatedTable, config: &GeometryConfig) -> RouteProjection {
    let mut projection = RouteProjection::default();
    let mut starts = Vec::new();

    for (index, activity) in table.iter().enumerate() {
        // Activities without GPS have neither a start point nor a route
        let Some(start) = activity.start_point else {
            continue;
        };
        starts.push(start);

        let head = config.include_start_point.then_some(start);
        let segment: Vec<GpsPoint> = head.into_iter().chain(activity.route.iter().copied()).collect();
        if segment.is_empty() {
            continue;
        }

        projection.owners.extend(std::iter::repeat(Some(index)).take(segment.len()));
        projection.points.extend(segment.into_iter().map(Some));
        projection.points.push(None);
        projection.owners.push(None);
    }

    projection.view = Bounds::from_points(&starts).and_then(|bounds| {
        median_center(&starts).map(|center| MapView {
            bounds,
            center,
            zoom: zoom_for_area(&bounds),
        })
    });
    projection
}
