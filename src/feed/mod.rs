//! Event feed collaborators
//!
//! The provider's activity feed is consumed through the `EventFeed` trait:
//! paged listing for one-shot queries, and a blocking, cancellable poll for
//! continuous monitoring.
//!
//! - `MemoryFeed`: scripted pages and batches
//! - `JsonlFeed`: provider events exported one JSON object per line

mod jsonl;
mod memory;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::Event;
use crate::utils::CancelToken;

pub use jsonl::{JsonlFeed, DEFAULT_PAGE_SIZE};
pub use memory::MemoryFeed;

/// Result type for feed operations
pub type FeedResult<T> = Result<T, FeedError>;

/// Errors raised by an event feed
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid page cursor: {0}")]
    InvalidCursor(String),

    #[error("provider error: {0}")]
    Provider(String),
}

/// One page of a paged listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventPage {
    pub events: Vec<Event>,
    /// Cursor for the next page, `None` on the last page
    pub next: Option<String>,
}

/// Source of provider events
///
/// Feeds deliver at least once: the same event may appear in several pages,
/// several batches, or be redelivered after a batch is not acknowledged.
/// Callers dedup on event id.
pub trait EventFeed {
    /// Fetch one page of events for `scope` (usually a sending domain)
    ///
    /// Pass `None` for the first page and the returned `next` cursor for
    /// each following page.
    fn list_page(&mut self, scope: &str, cursor: Option<&str>) -> FeedResult<EventPage>;

    /// Block until the next batch of new events is available
    ///
    /// Returns `Ok(None)` once `cancel` is cancelled or the feed has no more
    /// batches to deliver.
    fn poll(
        &mut self,
        scope: &str,
        interval: Duration,
        cancel: &CancelToken,
    ) -> FeedResult<Option<Vec<Event>>>;

    /// Confirm that the last polled batch has been durably stored
    ///
    /// A batch that is never acknowledged may be delivered again.
    fn acknowledge(&mut self) -> FeedResult<()> {
        Ok(())
    }
}
