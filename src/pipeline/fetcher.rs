//! Fetch stage: page numbers in, activity pages out.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::{debug, warn};

use super::stage::Step;
use super::ActivitySource;
use crate::activity::Page;
use crate::error::PipelineError;

/// Fetches one page per input item and detects the end of the collection.
pub(crate) struct PageFetcher {
    source: Arc<dyn ActivitySource>,
    page_size: u32,
    /// Lowest page number known to be the last one
    last_page: AtomicU32,
}

impl PageFetcher {
    pub fn new(source: Arc<dyn ActivitySource>, page_size: u32) -> Self {
        Self {
            source,
            page_size: page_size.max(1),
            last_page: AtomicU32::new(u32::MAX),
        }
    }

    /// A page shorter than `page_size` (including an empty one) is the last;
    /// page numbers past it are skipped without a request.
    pub fn handle(&self, page: u32) -> Step<Page> {
        if page > self.last_page.load(Ordering::Acquire) {
            debug!("[PageFetcher] skipping page {} past the end", page);
            return Step::Skip;
        }

        match self.source.fetch_page(page, self.page_size) {
            Ok(Page::Fault(fault)) => {
                warn!("[PageFetcher] page {} returned an error object: {}", page, fault);
                Step::Fail(PipelineError::Api(fault))
            }
            Ok(fetched) => {
                let count = fetched.len();
                debug!("[PageFetcher] page {}: {} activities", page, count);

                if count >= self.page_size as usize {
                    return Step::Emit(fetched);
                }

                self.last_page.fetch_min(page, Ordering::AcqRel);
                Step::Finish((count > 0).then_some(fetched))
            }
            Err(e) => {
                warn!("[PageFetcher] page {} failed: {}", page, e);
                Step::Fail(e.into())
            }
        }
    }
}
