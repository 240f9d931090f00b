//! Ingest a Strava account and print every dashboard view.
//! Run with: STRAVA_ACCESS_TOKEN=... cargo run --example ingest
//!
//! With STRAVA_CLIENT_ID / STRAVA_CLIENT_SECRET set, a STRAVA_REFRESH_TOKEN is
//! exchanged for a fresh access token first.

use std::env;
use std::time::Instant;

use activity_mapper::strava::refresh;
use activity_mapper::{
    category_rollup, hour_dial, ingest, project_routes, weekday_histogram, weekly_timeline,
    CategoryTable, DialConfig, GeometryConfig, HttpClient, IngestConfig, OAuthCredentials,
    TimelineConfig,
};

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = IngestConfig::default();

    let access_token = match (OAuthCredentials::from_env(), env::var("STRAVA_REFRESH_TOKEN")) {
        (Some(credentials), Ok(refresh_token)) => {
            let http = HttpClient::new(config.http.clone())?;
            let grant = refresh(&http, &config.endpoints, &credentials, &refresh_token)?;
            println!("Athlete: {}", grant.athlete_name);
            grant.access_token
        }
        _ => env::var("STRAVA_ACCESS_TOKEN")?,
    };

    println!("Activity ingestion");
    println!("==================");

    let start = Instant::now();
    let table = ingest(&access_token, &config)?;
    println!("{} activities in {:.2}s", table.len(), start.elapsed().as_secs_f64());
    println!();

    let timeline = weekly_timeline(&table, &TimelineConfig { fill_missing_weeks: true });
    println!("Last weeks:");
    for bucket in timeline.buckets.iter().rev().take(8) {
        println!("  {} ({}) {}", bucket.key, bucket.week_start, "#".repeat(bucket.count));
    }
    println!();

    let histogram = weekday_histogram(&table);
    println!("Weekdays:");
    for (day, pct) in WEEKDAYS.iter().zip(histogram.percentages) {
        println!("  {day} {pct:5.1}%");
    }
    println!();

    let dial = hour_dial(&table, &DialConfig::default());
    if let Some(busiest) = dial.points.iter().max_by_key(|point| point.radius) {
        let activity = &table.activities()[busiest.activity];
        println!(
            "Busiest start time: {:02}:{:02} ({} activities at {:.1} deg)",
            activity.hour, activity.minute / 10 * 10, busiest.radius, busiest.angle
        );
    }

    println!("Categories:");
    for entry in category_rollup(&table, &CategoryTable::embedded().with_fallback("Other")) {
        println!("  {:<16} {}", entry.category, entry.count);
    }
    println!();

    let routes = project_routes(&table, &GeometryConfig::default());
    let segments = routes.points.iter().filter(|point| point.is_none()).count();
    println!("Map: {} points in {} segments", routes.points.len() - segments, segments);
    if let Some(view) = routes.view {
        println!(
            "  center {:.4}, {:.4} at zoom {}",
            view.center.latitude, view.center.longitude, view.zoom
        );
    }

    Ok(())
}
