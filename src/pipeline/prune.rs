//! Reconciliation of the bounced store against the events store

use tracing::{debug, info, warn};

use super::{Pipeline, PipelineResult};
use crate::store::StoreError;

impl Pipeline {
    /// Remove bounced markers whose event is no longer stored
    ///
    /// Returns the number of markers removed. Afterwards every bounced key
    /// is also an events key.
    pub fn prune_bounced(&self) -> PipelineResult<usize> {
        let events = &self.stores.events;
        let bounced = &self.stores.bounced;
        let mut pruned = 0;

        for key in bounced.keys()? {
            if events.exists(&key) {
                continue;
            }
            match bounced.delete(&key) {
                Ok(()) => {
                    debug!(key = %key, "pruned bounced marker");
                    pruned += 1;
                }
                Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        if pruned > 0 {
            info!(pruned, "pruned bounced store");
        }
        Ok(pruned)
    }

    /// Discard every stored event
    ///
    /// Bounced markers are kept until the next `prune_bounced`.
    pub fn reset_events(&self) -> PipelineResult<()> {
        warn!(path = %self.stores.events.path().display(), "resetting events store");
        self.stores.events.reset()?;
        Ok(())
    }

    /// Forget which events were bounced
    ///
    /// Every stored failure will be bounced again on the next pass.
    pub fn reset_bounced(&self) -> PipelineResult<()> {
        warn!(path = %self.stores.bounced.path().display(), "resetting bounced store");
        self.stores.bounced.reset()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::{DsnRenderer, MemorySink};
    use crate::types::Event;
    use tempfile::TempDir;

    fn create_test_pipeline() -> (Pipeline, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let pipeline =
            Pipeline::open(temp_dir.path(), DsnRenderer::new("mx.test"), MemorySink::new()).unwrap();
        (pipeline, temp_dir)
    }

    #[test]
    fn test_prune_removes_only_orphans() {
        let (pipeline, _temp_dir) = create_test_pipeline();
        pipeline.store_if_new(&Event::other("evt1", 1.0, "delivered")).unwrap();
        pipeline.stores().bounced.put_json("evt1", &true).unwrap();
        pipeline.stores().bounced.put_json("gone", &true).unwrap();

        assert_eq!(pipeline.prune_bounced().unwrap(), 1);
        assert_eq!(pipeline.stores().bounced.keys().unwrap(), vec!["evt1"]);
        assert_eq!(pipeline.prune_bounced().unwrap(), 0);
    }

    #[test]
    fn test_reset_events_then_prune_empties_bounced() {
        let (pipeline, _temp_dir) = create_test_pipeline();
        for id in ["a", "b", "c"] {
            pipeline.store_if_new(&Event::other(id, 1.0, "delivered")).unwrap();
            pipeline.stores().bounced.put_json(id, &true).unwrap();
        }

        pipeline.reset_events().unwrap();
        assert_eq!(pipeline.stores().bounced.len().unwrap(), 3);

        assert_eq!(pipeline.prune_bounced().unwrap(), 3);
        assert!(pipeline.stores().bounced.is_empty().unwrap());
    }

    #[test]
    fn test_reset_bounced_keeps_events() {
        let (pipeline, _temp_dir) = create_test_pipeline();
        pipeline.store_if_new(&Event::other("evt1", 1.0, "delivered")).unwrap();
        pipeline.stores().bounced.put_json("evt1", &true).unwrap();

        pipeline.reset_bounced().unwrap();
        assert!(pipeline.stores().bounced.is_empty().unwrap());
        assert!(pipeline.stores().events.exists("evt1"));
    }
}
