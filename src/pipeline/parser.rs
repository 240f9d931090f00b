//! Parse stage: activity pages in, parsed batches out.

use log::warn;

use super::stage::Step;
use crate::activity::{ActivityParser, Page, ParsedActivity};

pub(crate) fn parse_page(parser: &ActivityParser, page: Page) -> Step<Vec<ParsedActivity>> {
    match parser.parse_page(&page) {
        Ok(batch) => Step::Emit(batch),
        Err(e) => {
            warn!("[PageParser] {}", e);
            Step::Fail(e.into())
        }
    }
}
