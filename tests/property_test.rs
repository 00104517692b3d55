//! Property tests for store keys, ingestion and bouncing.

use std::collections::BTreeSet;
use std::sync::Arc;

use mailbounce::mail::{DsnRenderer, MemorySink};
use mailbounce::store::{decode_filename, encode_filename, KeyedStore, MAX_KEY_LEN};
use mailbounce::types::{Event, Failure};
use mailbounce::Pipeline;
use proptest::{prelude::*, test_runner::Config as ProptestConfig};
use tempfile::TempDir;

/// Deterministic property test configuration.
///
/// `PROPTEST_CASES` overrides the number of cases.
fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(32);

    ProptestConfig {
        cases,
        failure_persistence: None,
        ..ProptestConfig::with_cases(cases)
    }
}

/// Event ids drawn from a small pool so duplicates are common.
fn event_ids() -> impl Strategy<Value = Vec<(String, bool)>> {
    prop::collection::vec(("evt[0-9]", any::<bool>()), 0..24)
}

proptest! {
    #![proptest_config(proptest_config())]

    /// Any non-empty key short enough for a filename maps to a safe name and back.
    #[test]
    fn filename_encoding_round_trips(key in "\\PC{1,40}") {
        prop_assume!(key.len() <= MAX_KEY_LEN);

        let name = encode_filename(&key);
        prop_assert!(!name.contains('/'));
        prop_assert!(!name.starts_with('.'));
        prop_assert_eq!(decode_filename(&name), Some(key));
    }

    /// Keys with separators, plus signs and unicode survive a store round trip.
    #[test]
    fn store_keys_round_trip(
        keys in prop::collection::btree_set("[a-z/+=. ]{0,6}\\PC{0,12}", 1..8),
    ) {
        let temp_dir = TempDir::new().unwrap();
        let store = KeyedStore::open(temp_dir.path(), "events").unwrap();
        let keys: BTreeSet<String> = keys.into_iter().filter(|k| !k.is_empty()).collect();

        for key in &keys {
            store.put(key, key.as_bytes()).unwrap();
        }

        let listed: BTreeSet<String> = store.keys().unwrap().into_iter().collect();
        prop_assert_eq!(&listed, &keys);
        for key in &keys {
            prop_assert_eq!(store.get(key).unwrap(), Some(key.as_bytes().to_vec()));
        }
    }

    /// However often an event is delivered, it is stored once and bounced once.
    #[test]
    fn redelivery_never_duplicates_bounces(deliveries in event_ids()) {
        let temp_dir = TempDir::new().unwrap();
        let sink = Arc::new(MemorySink::new());
        let pipeline = Pipeline::open(
            temp_dir.path(),
            DsnRenderer::new("mx.test"),
            Arc::clone(&sink),
        )
        .unwrap();

        let mut first_kind = std::collections::BTreeMap::new();
        for (i, (id, is_failure)) in deliveries.iter().enumerate() {
            let event = if *is_failure {
                Event::failed(id.as_str(), i as f64, Failure::new("a@example.org", "b@example.org"))
            } else {
                Event::other(id.as_str(), i as f64, "delivered")
            };
            pipeline.store_if_new(&event).unwrap();
            first_kind.entry(id.clone()).or_insert(*is_failure);

            // Bounce passes interleaved with ingestion
            if i % 3 == 0 {
                pipeline.generate_bounces().unwrap();
            }
        }
        pipeline.generate_bounces().unwrap();
        pipeline.generate_bounces().unwrap();

        let expected_failures = first_kind.values().filter(|f| **f).count();
        prop_assert_eq!(pipeline.stores().events.len().unwrap(), first_kind.len());
        prop_assert_eq!(sink.count(), expected_failures);
        prop_assert_eq!(pipeline.stores().bounced.len().unwrap(), expected_failures);
    }
}
