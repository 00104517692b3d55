//! Bounce generation: failed events → DSNs, each sent at most once

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::{Pipeline, PipelineResult};
use crate::mail::{RenderError, SendError};
use crate::types::{DecodeError, Event};

/// Why a single stored event could not be bounced in this pass
#[derive(Debug)]
pub enum BounceFailure {
    /// Stored blob is not a valid event
    Decode(DecodeError),
    /// Failure event could not be turned into a DSN
    Render(RenderError),
    /// Transport did not accept the DSN; retried next pass
    Send(SendError),
}

impl std::fmt::Display for BounceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BounceFailure::Decode(e) => write!(f, "corrupt event: {}", e),
            BounceFailure::Render(e) => write!(f, "cannot render bounce: {}", e),
            BounceFailure::Send(e) => write!(f, "send failed: {}", e),
        }
    }
}

/// Outcome of one bounce pass
#[derive(Debug, Default)]
pub struct BounceReport {
    /// Keys examined
    pub scanned: usize,
    /// Keys whose bounce was sent in this pass
    pub sent: Vec<String>,
    /// Failed events bounced in an earlier pass
    pub already_bounced: usize,
    /// Events of any other kind
    pub not_failures: usize,
    /// Keys skipped because of a per-event problem
    pub failures: Vec<(String, BounceFailure)>,
}

impl BounceReport {
    /// True if no event was skipped because of an error
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of keys whose send failed and will be retried
    pub fn send_failures(&self) -> usize {
        self.failures
            .iter()
            .filter(|(_, f)| matches!(f, BounceFailure::Send(_)))
            .count()
    }
}

impl Pipeline {
    /// Send a DSN for every stored failure not yet bounced
    ///
    /// A key enters the bounced store only after its DSN was accepted by
    /// the sink, so a failed send is retried on the next pass and a sent
    /// one never repeats. Per-event problems are recorded in the report;
    /// only store errors abort the pass.
    pub fn generate_bounces(&self) -> PipelineResult<BounceReport> {
        self.generate_bounces_at(Utc::now())
    }

    /// Same as `generate_bounces`, dating the DSNs at `now`
    pub fn generate_bounces_at(&self, now: DateTime<Utc>) -> PipelineResult<BounceReport> {
        let events = &self.stores.events;
        let bounced = &self.stores.bounced;
        let mut report = BounceReport::default();

        let mut keys = events.keys()?;
        keys.sort();

        for key in keys {
            report.scanned += 1;

            let Some(data) = events.get(&key)? else {
                debug!(key = %key, "event vanished during bounce pass");
                continue;
            };

            let event = match Event::decode(&data) {
                Ok(event) => event,
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping corrupt stored event");
                    report.failures.push((key, BounceFailure::Decode(e)));
                    continue;
                }
            };

            let Some(failure) = event.failure() else {
                report.not_failures += 1;
                continue;
            };

            if bounced.exists(&key) {
                report.already_bounced += 1;
                continue;
            }

            let message = match self.renderer.render(&event, now) {
                Ok(message) => message,
                Err(e) => {
                    warn!(key = %key, error = %e, "cannot render bounce");
                    report.failures.push((key, BounceFailure::Render(e)));
                    continue;
                }
            };

            if let Err(e) = self.sink.send(&message) {
                error!(
                    key = %key,
                    sender = %failure.envelope.sender,
                    error = %e,
                    "failed to send bounce, will retry"
                );
                report.failures.push((key, BounceFailure::Send(e)));
                continue;
            }

            bounced.put_json(&key, &true)?;
            info!(
                key = %key,
                message_id = %failure.message.headers.message_id,
                recipient = %failure.recipient,
                "sent bounce"
            );
            report.sent.push(key);
        }

        info!(
            scanned = report.scanned,
            sent = report.sent.len(),
            already_bounced = report.already_bounced,
            failures = report.failures.len(),
            "bounce pass complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::{DsnRenderer, MemorySink};
    use crate::store::{encode_filename, MAX_KEY_LEN};
    use crate::types::Failure;
    use chrono::TimeZone;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_pipeline() -> (Pipeline, Arc<MemorySink>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let sink = Arc::new(MemorySink::new());
        let pipeline =
            Pipeline::open(temp_dir.path(), DsnRenderer::new("mx.test"), Arc::clone(&sink)).unwrap();
        (pipeline, sink, temp_dir)
    }

    fn failed(id: &str) -> Event {
        Event::failed(
            id,
            1_700_000_000.0,
            Failure::new("a@example.org", "b@example.org").with_status(550, "mailbox unavailable"),
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn test_bounces_each_failure_once() {
        let (pipeline, sink, _temp_dir) = create_test_pipeline();
        pipeline.store_if_new(&failed("evt1")).unwrap();
        pipeline.store_if_new(&Event::other("evt2", 1.0, "delivered")).unwrap();

        let report = pipeline.generate_bounces_at(now()).unwrap();
        assert_eq!(report.sent, vec!["evt1"]);
        assert_eq!(report.not_failures, 1);
        assert!(report.is_clean());
        assert_eq!(sink.count(), 1);
        assert_eq!(pipeline.stores().bounced.get_json::<bool>("evt1").unwrap(), Some(true));

        let text = &sink.sent_text()[0];
        assert!(text.contains("To: b@example.org\r\n"));
        assert!(text.contains("Final-Recipient: rfc822; a@example.org\r\n"));
        assert!(text.contains("Status: 550\r\n"));

        let again = pipeline.generate_bounces_at(now()).unwrap();
        assert!(again.sent.is_empty());
        assert_eq!(again.already_bounced, 1);
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn test_send_failure_is_retried() {
        let (pipeline, sink, _temp_dir) = create_test_pipeline();
        pipeline.store_if_new(&failed("evt1")).unwrap();
        pipeline.store_if_new(&failed("evt2")).unwrap();
        sink.fail_next(1);

        let report = pipeline.generate_bounces_at(now()).unwrap();
        assert_eq!(report.sent, vec!["evt2"]);
        assert_eq!(report.send_failures(), 1);
        assert!(!report.is_clean());
        assert!(!pipeline.stores().bounced.exists("evt1"));

        let retry = pipeline.generate_bounces_at(now()).unwrap();
        assert_eq!(retry.sent, vec!["evt1"]);
        assert_eq!(retry.already_bounced, 1);
        assert_eq!(sink.count(), 2);
    }

    #[test]
    fn test_corrupt_event_does_not_stop_pass() {
        let (pipeline, sink, _temp_dir) = create_test_pipeline();
        pipeline.stores().events.put("evt0", b"{not json").unwrap();
        pipeline.store_if_new(&failed("evt1")).unwrap();

        let report = pipeline.generate_bounces_at(now()).unwrap();
        assert_eq!(report.sent, vec!["evt1"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "evt0");
        assert!(matches!(report.failures[0].1, BounceFailure::Decode(_)));
        assert!(!pipeline.stores().bounced.exists("evt0"));
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn test_stray_oversized_file_does_not_block_pass() {
        let (pipeline, sink, _temp_dir) = create_test_pipeline();
        pipeline.store_if_new(&failed("evt1")).unwrap();
        let stray = encode_filename(&"k".repeat(MAX_KEY_LEN + 2));
        std::fs::write(pipeline.stores().events.path().join(stray), "{}").unwrap();

        let report = pipeline.generate_bounces_at(now()).unwrap();
        assert_eq!(report.sent, vec!["evt1"]);
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn test_failure_without_sender_is_not_marked() {
        let (pipeline, sink, _temp_dir) = create_test_pipeline();
        pipeline
            .store_if_new(&Event::failed("evt1", 1.0, Failure::new("a@example.org", "")))
            .unwrap();

        let report = pipeline.generate_bounces_at(now()).unwrap();
        assert!(matches!(report.failures[0].1, BounceFailure::Render(_)));
        assert!(!pipeline.stores().bounced.exists("evt1"));
        assert_eq!(sink.count(), 0);
    }
}
