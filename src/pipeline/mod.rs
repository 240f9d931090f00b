//! # Ingestion Pipeline
//!
//! Two worker pools connected by unbounded queues:
//!
//! ```text
//! page numbers ──▶ [fetch-0..N] ──▶ pages ──▶ [parse-0..M] ──▶ batches ──▶ table
//! ```
//!
//! The orchestrator feeds page numbers at a fixed interval until the fetch stage
//! reports the end of the collection (a page shorter than the page size). Each
//! stage shuts down through a marker that every worker observes once, and a
//! per-stage closer forwards exactly one terminal message to the next queue.
//! An error anywhere aborts the run: no partial table is returned.

mod fetcher;
mod parser;
mod stage;

pub use stage::{Signal, StageReport, WorkerExit};

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;
use log::{debug, info, warn};

use crate::activity::{ActivityParser, ConsolidatedTable, Page};
use crate::error::{PipelineError, RequestFailure};
use fetcher::PageFetcher;
use stage::spawn_stage;

/// Item carried by a pipeline queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Message<T> {
    Data(T),
    /// No further items will arrive.
    EndOfStream,
    /// The run failed upstream.
    Error(PipelineError),
}

/// Paginated source of raw activities.
pub trait ActivitySource: Send + Sync {
    /// Fetch page `page` (1-based) holding at most `per_page` activities.
    fn fetch_page(&self, page: u32, per_page: u32) -> Result<Page, RequestFailure>;
}

/// Configuration for [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Threads issuing page requests.
    /// Default: 5
    pub fetch_workers: usize,

    /// Threads parsing pages (and geocoding start points).
    /// Default: 10
    pub parse_workers: usize,

    /// Activities requested per page; a shorter page ends the collection.
    /// Default: 200 (the API maximum)
    pub page_size: u32,

    /// Delay between submitting consecutive page numbers.
    /// Default: 250ms
    pub submit_interval: Duration,

    /// Default: 1
    pub first_page: u32,

    /// Stop submitting after this many pages even without a short page.
    /// Default: None
    pub max_pages: Option<u32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_workers: 5,
            parse_workers: 10,
            page_size: 200,
            submit_interval: Duration::from_millis(250),
            first_page: 1,
            max_pages: None,
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct Ingestion {
    pub table: ConsolidatedTable,
    /// Page numbers handed to the fetch stage
    pub pages_submitted: u32,
    pub fetch: StageReport,
    pub parse: StageReport,
    pub elapsed: Duration,
}

/// Fetch-and-parse pipeline over an [`ActivitySource`].
pub struct Pipeline {
    source: Arc<dyn ActivitySource>,
    parser: ActivityParser,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(source: Arc<dyn ActivitySource>, parser: ActivityParser, config: PipelineConfig) -> Self {
        Self { source, parser, config }
    }

    /// Fetch and parse the whole collection, oldest activity first.
    pub fn ingest(&self) -> Result<ConsolidatedTable, PipelineError> {
        self.ingest_with_report().map(|ingestion| ingestion.table)
    }

    /// Like [`Pipeline::ingest`], with per-stage worker reports.
    pub fn ingest_with_report(&self) -> Result<Ingestion, PipelineError> {
        let start = Instant::now();
        let config = &self.config;

        let (fetch_tx, fetch_rx) = unbounded::<Message<u32>>();
        let (parse_tx, parse_rx) = unbounded::<Message<Page>>();
        let (output_tx, output_rx) = unbounded();

        let fetcher = PageFetcher::new(Arc::clone(&self.source), config.page_size);
        let fetch = spawn_stage(
            "fetch",
            config.fetch_workers,
            fetch_tx.clone(),
            fetch_rx,
            parse_tx.clone(),
            move |page| fetcher.handle(page),
        )?;

        let activity_parser = self.parser.clone();
        let parse = match spawn_stage(
            "parse",
            config.parse_workers,
            parse_tx,
            parse_rx,
            output_tx,
            move |page| parser::parse_page(&activity_parser, page),
        ) {
            Ok(parse) => parse,
            Err(e) => {
                let _ = fetch_tx.send(Message::Error(e.clone()));
                return Err(e);
            }
        };

        // Submit page numbers until either stage halts
        let mut pages_submitted = 0;
        let mut page = config.first_page;
        while !fetch.is_halted() && !parse.is_halted() {
            if config.max_pages.is_some_and(|max| pages_submitted >= max) {
                info!("[Pipeline] page cap of {} reached", pages_submitted);
                break;
            }
            if fetch_tx.send(Message::Data(page)).is_err() {
                break;
            }
            debug!("[Pipeline] submitted page {}", page);
            pages_submitted += 1;
            page += 1;
            thread::sleep(config.submit_interval);
        }
        let _ = fetch_tx.send(Message::EndOfStream);
        drop(fetch_tx);

        let mut batches = Vec::new();
        let outcome = loop {
            match output_rx.recv() {
                Ok(Message::Data(batch)) => batches.push(batch),
                Ok(Message::EndOfStream) => break Ok(()),
                Ok(Message::Error(e)) => break Err(e),
                Err(_) => break Err(PipelineError::Disconnected { stage: "parse" }),
            }
        };

        let fetch_report = fetch.join();
        let parse_report = parse.join();

        if let Err(e) = outcome {
            warn!("[Pipeline] aborted after {:.2}s: {}", start.elapsed().as_secs_f64(), e);
            return Err(e);
        }

        let table = ConsolidatedTable::from_batches(batches);
        let elapsed = start.elapsed();
        info!(
            "[Pipeline] ingested {} activities from {} submitted pages in {:.2}s",
            table.len(),
            pages_submitted,
            elapsed.as_secs_f64()
        );

        Ok(Ingestion {
            table,
            pages_submitted,
            fetch: fetch_report?,
            parse: parse_report?,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{ApiFault, RawActivity};
    use crate::error::ParseError;
    use chrono::NaiveDate;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory source serving prepared pages; missing pages are empty.
    struct MockSource {
        pages: Vec<Result<Page, RequestFailure>>,
        calls: AtomicUsize,
        requested: Mutex<Vec<u32>>,
    }

    impl MockSource {
        fn new(pages: Vec<Result<Page, RequestFailure>>) -> Arc<Self> {
            Arc::new(Self {
                pages,
                calls: AtomicUsize::new(0),
                requested: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ActivitySource for MockSource {
        fn fetch_page(&self, page: u32, _per_page: u32) -> Result<Page, RequestFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requested.lock().push(page);
            self.pages
                .get(page as usize - 1)
                .cloned()
                .unwrap_or(Ok(Page::Activities(Vec::new())))
        }
    }

    /// Page of `count` activities with ids starting at `first_id`; a higher
    /// id means an older activity, so later pages hold older records.
    fn page(first_id: u64, count: usize) -> Result<Page, RequestFailure> {
        let newest = NaiveDate::from_ymd_opt(2024, 6, 1)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .unwrap();
        let activities = (first_id..first_id + count as u64)
            .map(|id| {
                let start = newest - chrono::Duration::hours(id as i64);
                serde_json::from_value(json!({
                    "id": id,
                    "name": format!("Activity {id}"),
                    "sport_type": "Run",
                    "start_date_local": start.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                }))
                .unwrap()
            })
            .collect();
        Ok(Page::Activities(activities))
    }

    fn config(fetch_workers: usize, page_size: u32) -> PipelineConfig {
        PipelineConfig {
            fetch_workers,
            parse_workers: 3,
            page_size,
            submit_interval: Duration::from_millis(1),
            ..PipelineConfig::default()
        }
    }

    fn pipeline(source: Arc<MockSource>, config: PipelineConfig) -> Pipeline {
        Pipeline::new(source, ActivityParser::without_geocoding(), config)
    }

    #[test]
    fn test_pagination_stops_after_short_page() {
        let source = MockSource::new(vec![page(1, 4), page(5, 4), page(9, 3)]);
        let ingestion = pipeline(source.clone(), config(1, 4)).ingest_with_report().unwrap();

        assert_eq!(source.calls(), 3);
        assert_eq!(*source.requested.lock(), vec![1, 2, 3]);
        assert_eq!(ingestion.table.len(), 11);
        assert_eq!(ingestion.fetch.exits, vec![WorkerExit::Finished]);
        assert_eq!(ingestion.fetch.forwarded, Signal::EndOfStream);
        assert_eq!(ingestion.parse.exits.len(), 3);
    }

    #[test]
    fn test_many_fetch_workers_collect_everything() {
        let source = MockSource::new(vec![page(1, 4), page(5, 4), page(9, 4), page(13, 2)]);
        let table = pipeline(source.clone(), config(5, 4)).ingest().unwrap();

        assert_eq!(table.len(), 14);
        assert!(source.calls() >= 4);

        let mut ids: Vec<u64> = table.iter().filter_map(|a| a.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, (1..=14).collect::<Vec<_>>());
    }

    #[test]
    fn test_table_is_sorted_by_start() {
        let source = MockSource::new(vec![page(1, 4), page(5, 4), page(9, 1)]);
        let table = pipeline(source, config(2, 4)).ingest().unwrap();

        assert!(table
            .activities()
            .windows(2)
            .all(|pair| pair[0].start <= pair[1].start));
        // Highest id is the oldest
        assert_eq!(table.activities()[0].id, Some(9));
    }

    #[test]
    fn test_empty_collection() {
        let source = MockSource::new(vec![]);
        let table = pipeline(source.clone(), config(1, 4)).ingest().unwrap();

        assert!(table.is_empty());
        assert_eq!(source.calls(), 1);
    }

    #[test]
    fn test_request_failure_aborts() {
        let source = MockSource::new(vec![
            page(1, 4),
            Err(RequestFailure::RetriesExhausted {
                status: 503,
                reason: "Service Unavailable".to_string(),
                attempts: 4,
            }),
            page(9, 4),
        ]);
        let err = pipeline(source, config(1, 4)).ingest().unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Request(RequestFailure::RetriesExhausted { status: 503, .. })
        ));
    }

    #[test]
    fn test_error_object_aborts() {
        let fault = ApiFault {
            status: Some("401".to_string()),
            reason: "Authorization Error".to_string(),
        };
        let source = MockSource::new(vec![Ok(Page::Fault(fault.clone()))]);
        let err = pipeline(source, config(2, 4)).ingest().unwrap_err();

        assert_eq!(err, PipelineError::Api(fault));
    }

    #[test]
    fn test_parse_failure_aborts() {
        let broken = Page::Activities(vec![RawActivity {
            id: Some(42),
            ..RawActivity::default()
        }]);
        let source = MockSource::new(vec![page(1, 4), Ok(broken)]);
        let err = pipeline(source, config(1, 4)).ingest().unwrap_err();

        assert_eq!(err, PipelineError::Parse(ParseError::MissingTimestamp { id: Some(42) }));
    }

    #[test]
    fn test_page_cap() {
        let pages = (0..10).map(|i| page(i * 4 + 1, 4)).collect();
        let source = MockSource::new(pages);
        let ingestion = pipeline(
            source.clone(),
            PipelineConfig {
                max_pages: Some(3),
                ..config(1, 4)
            },
        )
        .ingest_with_report()
        .unwrap();

        assert_eq!(ingestion.pages_submitted, 3);
        assert_eq!(source.calls(), 3);
        assert_eq!(ingestion.table.len(), 12);
        assert_eq!(
            ingestion.fetch.exits,
            vec![WorkerExit::Signalled(Signal::EndOfStream)]
        );
    }
}
