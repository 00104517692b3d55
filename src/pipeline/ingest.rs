//! Ingestion: feed → events store, deduplicated on event id

use tracing::{debug, info};

use super::{Pipeline, PipelineResult};
use crate::feed::EventFeed;
use crate::store::StoreResult;
use crate::types::Event;
use crate::utils::format_timestamp;

/// Counts from one ingestion run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Pages fetched from the feed
    pub pages: usize,
    /// Events delivered by the feed
    pub seen: usize,
    /// Events written to the store
    pub stored: usize,
    /// Events already present in the store
    pub duplicates: usize,
}

impl IngestReport {
    fn record(&mut self, stored: bool) {
        self.seen += 1;
        if stored {
            self.stored += 1;
        } else {
            self.duplicates += 1;
        }
    }
}

impl Pipeline {
    /// Persist `event` unless its id is already stored
    ///
    /// Returns true if the event was written. A redelivered event never
    /// overwrites the first stored copy.
    pub fn store_if_new(&self, event: &Event) -> StoreResult<bool> {
        let events = &self.stores.events;

        if events.exists(&event.id) {
            debug!(id = %event.id, kind = %event.kind, "duplicate event");
            return Ok(false);
        }

        events.put(&event.id, &event.encode())?;
        info!(
            id = %event.id,
            kind = %event.kind,
            timestamp = %format_timestamp(event.timestamp),
            "new event"
        );
        Ok(true)
    }

    /// Fetch every available page for `scope` and store the new events
    pub fn query(&self, feed: &mut dyn EventFeed, scope: &str) -> PipelineResult<IngestReport> {
        let mut report = IngestReport::default();
        let mut cursor: Option<String> = None;

        loop {
            let page = feed.list_page(scope, cursor.as_deref())?;
            report.pages += 1;

            for event in &page.events {
                let stored = self.store_if_new(event)?;
                report.record(stored);
            }

            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        info!(
            scope,
            pages = report.pages,
            seen = report.seen,
            stored = report.stored,
            duplicates = report.duplicates,
            "query complete"
        );
        Ok(report)
    }

    /// Discard the events store and ingest everything the feed still has
    ///
    /// Bounced entries for events the feed no longer returns are pruned
    /// afterwards. Returns the ingestion counts and the number pruned.
    pub fn rebuild_events(
        &self,
        feed: &mut dyn EventFeed,
        scope: &str,
    ) -> PipelineResult<(IngestReport, usize)> {
        self.reset_events()?;
        let report = self.query(feed, scope)?;
        let pruned = self.prune_bounced()?;
        Ok((report, pruned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{EventPage, FeedError, FeedResult, MemoryFeed};
    use crate::mail::{DsnRenderer, MemorySink};
    use crate::pipeline::PipelineError;
    use crate::types::Failure;
    use crate::utils::CancelToken;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Feed whose provider always refuses the request
    struct BrokenFeed;

    impl EventFeed for BrokenFeed {
        fn list_page(&mut self, _scope: &str, _cursor: Option<&str>) -> FeedResult<EventPage> {
            Err(FeedError::Provider("401 unauthorized".to_string()))
        }

        fn poll(
            &mut self,
            _scope: &str,
            _interval: Duration,
            _cancel: &CancelToken,
        ) -> FeedResult<Option<Vec<Event>>> {
            Ok(None)
        }
    }

    fn create_test_pipeline() -> (Pipeline, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let pipeline = Pipeline::open(
            temp_dir.path(),
            DsnRenderer::new("mx.test"),
            MemorySink::new(),
        )
        .unwrap();
        (pipeline, temp_dir)
    }

    #[test]
    fn test_store_if_new_keeps_first_copy() {
        let (pipeline, _temp_dir) = create_test_pipeline();

        let first = Event::failed("evt1", 1.0, Failure::new("a@example.org", "b@example.org"));
        let second = Event::other("evt1", 2.0, "delivered");

        assert!(pipeline.store_if_new(&first).unwrap());
        assert!(!pipeline.store_if_new(&second).unwrap());

        let stored = pipeline.stores().events.get("evt1").unwrap().unwrap();
        assert_eq!(stored, first.encode());
        assert_eq!(pipeline.stores().events.keys().unwrap(), vec!["evt1"]);
    }

    #[test]
    fn test_query_walks_all_pages() {
        let (pipeline, _temp_dir) = create_test_pipeline();
        let mut feed = MemoryFeed::with_pages(vec![
            vec![
                Event::other("e1", 1.0, "delivered"),
                Event::other("e2", 2.0, "opened"),
            ],
            vec![Event::other("e2", 2.0, "opened")],
            vec![Event::other("e3", 3.0, "clicked")],
        ]);

        let report = pipeline.query(&mut feed, "example.org").unwrap();

        assert_eq!(
            report,
            IngestReport {
                pages: 3,
                seen: 4,
                stored: 3,
                duplicates: 1,
            }
        );
        assert_eq!(pipeline.stores().events.len().unwrap(), 3);

        // Running it again stores nothing new
        let again = pipeline.query(&mut feed, "example.org").unwrap();
        assert_eq!(again.stored, 0);
        assert_eq!(again.duplicates, 4);
    }

    #[test]
    fn test_query_propagates_feed_errors() {
        let (pipeline, _temp_dir) = create_test_pipeline();

        assert!(matches!(
            pipeline.query(&mut BrokenFeed, "example.org"),
            Err(PipelineError::Feed(FeedError::Provider(_)))
        ));
    }

    #[test]
    fn test_rebuild_events_prunes_vanished() {
        let (pipeline, _temp_dir) = create_test_pipeline();

        pipeline.store_if_new(&Event::other("old", 1.0, "rejected")).unwrap();
        pipeline.stores().bounced.put_json("old", &true).unwrap();
        pipeline.store_if_new(&Event::other("kept", 1.0, "delivered")).unwrap();
        pipeline.stores().bounced.put_json("kept", &true).unwrap();

        let mut feed = MemoryFeed::with_pages(vec![vec![Event::other("kept", 1.0, "delivered")]]);
        let (report, pruned) = pipeline.rebuild_events(&mut feed, "example.org").unwrap();

        assert_eq!(report.stored, 1);
        assert_eq!(pruned, 1);
        assert!(!pipeline.stores().events.exists("old"));
        assert!(!pipeline.stores().bounced.exists("old"));
        assert!(pipeline.stores().bounced.exists("kept"));
    }
}
