//! The two stores the bounce pipeline works on

use std::path::{Path, PathBuf};

use super::keyed::{KeyedStore, StoreResult};

/// Directory name of the events store under the data root
pub const EVENTS_STORE: &str = "events";

/// Directory name of the bounced store under the data root
pub const BOUNCED_STORE: &str = "bounced";

/// Events store plus bounced store, opened under one data root
///
/// Invariant kept by the pipeline: every key in `bounced` is also a key in
/// `events`, except transiently between an events reset and the next prune.
#[derive(Debug)]
pub struct Stores {
    root: PathBuf,
    /// Every ingested event, keyed by event id
    pub events: KeyedStore,
    /// Event ids that already had a bounce sent, value `true`
    pub bounced: KeyedStore,
}

impl Stores {
    /// Open (creating if needed) both stores under `root`
    pub fn open<P: AsRef<Path>>(root: P) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        Ok(Self {
            events: KeyedStore::open(&root, EVENTS_STORE)?,
            bounced: KeyedStore::open(&root, BOUNCED_STORE)?,
            root,
        })
    }

    /// Data root both stores live under
    pub fn root(&self) -> &Path {
        &self.root
    }
}
