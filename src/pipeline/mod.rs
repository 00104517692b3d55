//! Bounce pipeline
//!
//! Ties the stores, the DSN renderer and the mail sink together:
//!
//! ```text
//! ┌──────┐   store_if_new   ┌────────┐  generate_bounces  ┌───────────┐
//! │ feed │─────────────────►│ events │───────────────────►│ mail sink │
//! └──────┘                  └────────┘         │          └───────────┘
//!                                ▲             ▼
//!                                │        ┌─────────┐
//!                                └────────│ bounced │  prune_bounced
//!                                         └─────────┘
//! ```
//!
//! Each event id is stored at most once, and bounced at most once: the
//! bounced store is only written after the sink accepted the message.

mod bounce;
mod ingest;
mod monitor;
mod prune;

use std::path::Path;

use thiserror::Error;

use crate::config::BouncerConfig;
use crate::feed::FeedError;
use crate::mail::{DryRunSink, DsnRenderer, MailSink, SendmailSink};
use crate::store::{StoreError, Stores};
use crate::utils::local_hostname;

pub use bounce::{BounceFailure, BounceReport};
pub use ingest::IngestReport;
pub use monitor::{Monitor, MonitorOptions, MonitorSummary};

/// Result type for pipeline passes
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors that abort a whole pipeline pass
///
/// Per-event problems (corrupt blobs, unroutable failures, rejected sends)
/// never abort a pass; they are collected in `BounceReport`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("feed error: {0}")]
    Feed(#[from] FeedError),
}

/// Stores plus the collaborators needed to bounce failures
pub struct Pipeline {
    stores: Stores,
    renderer: DsnRenderer,
    sink: Box<dyn MailSink>,
}

impl Pipeline {
    /// Create a pipeline over already opened stores
    pub fn new<S: MailSink + 'static>(stores: Stores, renderer: DsnRenderer, sink: S) -> Self {
        Self {
            stores,
            renderer,
            sink: Box::new(sink),
        }
    }

    /// Open the stores under `data_root` and build a pipeline on them
    pub fn open<P, S>(data_root: P, renderer: DsnRenderer, sink: S) -> PipelineResult<Self>
    where
        P: AsRef<Path>,
        S: MailSink + 'static,
    {
        Ok(Self::new(Stores::open(data_root)?, renderer, sink))
    }

    /// Build a pipeline from configuration
    ///
    /// Uses `DryRunSink` when `dry_run` is set, `SendmailSink` otherwise.
    pub fn from_config(config: &BouncerConfig) -> PipelineResult<Self> {
        let host = config
            .reporting_host
            .clone()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(local_hostname);
        let renderer = DsnRenderer::new(host);

        if config.dry_run {
            Self::open(&config.data_root, renderer, DryRunSink)
        } else {
            let sink = SendmailSink::new(&config.sendmail_path, config.send_timeout());
            Self::open(&config.data_root, renderer, sink)
        }
    }

    /// The events and bounced stores
    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// The DSN renderer
    pub fn renderer(&self) -> &DsnRenderer {
        &self.renderer
    }
}
