//! Mail bounce generator
//!
//! Consumes an email provider's delivery event feed, keeps every event in a
//! durable keyed store, and sends one RFC 3464 delivery status notification
//! back to the original sender for each permanent delivery failure.
//!
//! # Guarantees
//!
//! - **Idempotent ingestion**: an event id is stored once; redelivery is a no-op
//! - **At most one bounce per event**: sends are recorded only after success
//! - **Crash safety**: every write is a temp file plus rename
//! - **Reconciliation**: bounced markers never outlive their event
//!
//! # Modules
//!
//! - `store`: directory-backed keyed stores
//! - `types`: provider event model
//! - `feed`: event feed trait and implementations
//! - `mail`: DSN rendering and mail sinks
//! - `pipeline`: ingestion, bounce generation, pruning, monitoring
//! - `config`: runtime configuration
//! - `logging`: tracing subscriber setup
//! - `utils`: cancellation and time helpers
//!
//! # Example
//!
//! ```no_run
//! use mailbounce::feed::JsonlFeed;
//! use mailbounce::mail::{DsnRenderer, SendmailSink};
//! use mailbounce::Pipeline;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Pipeline::open(
//!         "/var/lib/mailbounce",
//!         DsnRenderer::new("mx.example.org"),
//!         SendmailSink::default(),
//!     )?;
//!     let mut feed = JsonlFeed::new("/var/log/provider-events.jsonl");
//!
//!     pipeline.query(&mut feed, "example.org")?;
//!     pipeline.generate_bounces()?;
//!     pipeline.prune_bounced()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod feed;
pub mod logging;
pub mod mail;
pub mod pipeline;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used items at crate root
pub use config::BouncerConfig;
pub use feed::{EventFeed, EventPage, FeedError};
pub use mail::{DsnRenderer, MailSink, SendError};
pub use pipeline::{
    BounceReport, IngestReport, Monitor, MonitorOptions, MonitorSummary, Pipeline, PipelineError,
};
pub use store::{KeyedStore, StoreError, Stores};
pub use types::{Event, EventKind, Failure, Severity};
pub use utils::CancelToken;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
