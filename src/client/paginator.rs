//! Lazy forward traversal of a paginated query.

use super::RateLimitedClient;
use crate::error::SourceError;
use crate::source::{PageRequest, Query};
use serde_json::Value;
use tracing::{debug, warn};

/// Single forward traversal over the pages of one query.
///
/// Stops on a short page, an explicit "no more pages" marker, or after
/// `max_pages` pages. Not restartable: build a new one to traverse again.
pub struct Paginator<'a> {
    client: &'a RateLimitedClient,
    query: Query,
    page_size: u32,
    max_pages: u32,
    next_page: u32,
    finished: bool,
    truncated: bool,
}

impl<'a> Paginator<'a> {
    pub fn new(
        client: &'a RateLimitedClient,
        query: Query,
        page_size: u32,
        max_pages: u32,
    ) -> Self {
        Self {
            client,
            query,
            page_size: page_size.max(1),
            max_pages,
            next_page: 1,
            finished: max_pages == 0,
            truncated: false,
        }
    }

    /// Fetch the next page, or `None` once the traversal is over.
    ///
    /// A failed fetch leaves the cursor in place, so calling again retries
    /// the same page.
    pub async fn next_page(&mut self) -> Option<Result<Vec<Value>, SourceError>> {
        if self.finished {
            return None;
        }

        let request = PageRequest {
            query: self.query.clone(),
            page: self.next_page,
            per_page: self.page_size,
        };

        let response = match self.client.send(&request).await {
            Ok(response) => response,
            Err(e) => return Some(Err(e)),
        };

        let short_page = response.items.len() < self.page_size as usize;
        if short_page || response.has_next == Some(false) {
            debug!("{}: last page {}", self.query, self.next_page);
            self.finished = true;
        } else if self.next_page >= self.max_pages {
            warn!(
                "{}: stopped after {} pages, results truncated",
                self.query, self.max_pages
            );
            self.finished = true;
            self.truncated = true;
        }

        self.next_page += 1;
        Some(Ok(response.items))
    }

    /// Whether the page cap cut the traversal short.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Pages fetched successfully so far.
    #[allow(dead_code)] // Diagnostic accessor
    pub fn pages_fetched(&self) -> u32 {
        self.next_page - 1
    }
}
