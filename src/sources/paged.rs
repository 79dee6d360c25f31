//! Paged bulk fetch exposed as a demand-driven source.

use crate::error::{BoxError, FlowError, Result};
use crate::types::PageRequest;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::trace;

/// Something that can return records one page at a time, typically a
/// repository query with an offset and a limit.
pub trait PageSource<T>: Send + Sync {
    fn fetch_page(&self, page: PageRequest) -> std::result::Result<Vec<T>, BoxError>;
}

impl<T, F> PageSource<T> for F
where
    F: Fn(PageRequest) -> std::result::Result<Vec<T>, BoxError> + Send + Sync,
{
    fn fetch_page(&self, page: PageRequest) -> std::result::Result<Vec<T>, BoxError> {
        self(page)
    }
}

/// Iterator over all records of a `PageSource`. The next page is fetched
/// only once the previous one is used up; a short page ends the sequence.
pub(crate) struct Pages<T> {
    source: Arc<dyn PageSource<T>>,
    next_page: PageRequest,
    buffer: VecDeque<T>,
    exhausted: bool,
}

impl<T> Pages<T> {
    pub fn new(source: Arc<dyn PageSource<T>>, page_size: usize) -> Self {
        Self {
            source,
            next_page: PageRequest::of(0, page_size.max(1)),
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }
}

impl<T> Iterator for Pages<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Result<T>> {
        if self.buffer.is_empty() && !self.exhausted {
            let page = self.next_page;
            match self.source.fetch_page(page) {
                Ok(records) => {
                    trace!(page = page.index, records = records.len(), "fetched page");
                    if records.len() < page.size {
                        self.exhausted = true;
                    }
                    self.buffer.extend(records);
                    self.next_page = page.next();
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(FlowError::from_boxed(e)));
                }
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
