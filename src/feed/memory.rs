//! In-memory feed with scripted pages and poll batches

use std::collections::VecDeque;
use std::time::Duration;

use super::{EventFeed, EventPage, FeedError, FeedResult};
use crate::types::Event;
use crate::utils::CancelToken;

/// Feed backed by in-memory pages and a queue of poll results
#[derive(Debug, Default)]
pub struct MemoryFeed {
    pages: Vec<Vec<Event>>,
    batches: VecDeque<FeedResult<Vec<Event>>>,
    close_when_drained: bool,
    pending_ack: bool,
    acknowledged: usize,
}

impl MemoryFeed {
    /// Create an empty feed
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a feed whose listing returns `pages` in order
    pub fn with_pages(pages: Vec<Vec<Event>>) -> Self {
        Self {
            pages,
            ..Self::default()
        }
    }

    /// Append a page to the listing
    pub fn push_page(&mut self, events: Vec<Event>) -> &mut Self {
        self.pages.push(events);
        self
    }

    /// Queue a batch for `poll`
    pub fn push_batch(&mut self, events: Vec<Event>) -> &mut Self {
        self.batches.push_back(Ok(events));
        self
    }

    /// Queue an error for `poll`
    pub fn push_error(&mut self, error: FeedError) -> &mut Self {
        self.batches.push_back(Err(error));
        self
    }

    /// Make `poll` return `None` once the queued batches are drained,
    /// instead of blocking until cancelled
    pub fn close_when_drained(mut self) -> Self {
        self.close_when_drained = true;
        self
    }

    /// Number of acknowledged batches
    pub fn acknowledged(&self) -> usize {
        self.acknowledged
    }

    /// Number of batches still queued
    pub fn pending_batches(&self) -> usize {
        self.batches.len()
    }
}

impl EventFeed for MemoryFeed {
    fn list_page(&mut self, _scope: &str, cursor: Option<&str>) -> FeedResult<EventPage> {
        let index = match cursor {
            None => 0,
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| FeedError::InvalidCursor(cursor.to_string()))?,
        };

        let Some(events) = self.pages.get(index) else {
            return Ok(EventPage::default());
        };
        let next = (index + 1 < self.pages.len()).then(|| (index + 1).to_string());

        Ok(EventPage {
            events: events.clone(),
            next,
        })
    }

    fn poll(
        &mut self,
        _scope: &str,
        interval: Duration,
        cancel: &CancelToken,
    ) -> FeedResult<Option<Vec<Event>>> {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            match self.batches.pop_front() {
                Some(Ok(events)) => {
                    self.pending_ack = true;
                    return Ok(Some(events));
                }
                Some(Err(e)) => return Err(e),
                None if self.close_when_drained => return Ok(None),
                None => {
                    if cancel.wait_timeout(interval) {
                        return Ok(None);
                    }
                }
            }
        }
    }

    fn acknowledge(&mut self) -> FeedResult<()> {
        if self.pending_ack {
            self.pending_ack = false;
            self.acknowledged += 1;
        }
        Ok(())
    }
}
