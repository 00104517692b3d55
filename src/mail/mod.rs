//! Outbound mail
//!
//! - `MailSink`: hands a rendered RFC 5322 message to a transport
//! - `DsnRenderer`: builds the multipart/report bounce for a failure event
//! - `SendmailSink`, `DryRunSink`, `MemorySink`: sink implementations

mod dsn;
mod sendmail;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

pub use dsn::{DsnRenderer, RenderError};
pub use sendmail::{SendmailSink, DEFAULT_SENDMAIL};

/// Errors handing a message to the transport
#[derive(Debug, Error)]
pub enum SendError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error talking to mail transport: {0}")]
    Io(#[from] std::io::Error),

    #[error("mail transport did not finish within {0:?}")]
    Timeout(Duration),

    #[error("mail transport rejected message (exit status {status:?}): {output}")]
    Rejected { status: Option<i32>, output: String },

    #[error("mail transport unavailable: {0}")]
    Unavailable(String),
}

/// Destination for rendered messages
pub trait MailSink {
    /// Deliver one raw RFC 5322 message
    ///
    /// Recipients are taken from the message headers.
    fn send(&self, message: &[u8]) -> Result<(), SendError>;
}

impl<T: MailSink + ?Sized> MailSink for Arc<T> {
    fn send(&self, message: &[u8]) -> Result<(), SendError> {
        (**self).send(message)
    }
}

impl<T: MailSink + ?Sized> MailSink for Box<T> {
    fn send(&self, message: &[u8]) -> Result<(), SendError> {
        (**self).send(message)
    }
}

/// Sink that logs messages instead of sending them
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunSink;

impl MailSink for DryRunSink {
    fn send(&self, message: &[u8]) -> Result<(), SendError> {
        let text = String::from_utf8_lossy(message);
        let to = text
            .lines()
            .find_map(|line| line.strip_prefix("To: "))
            .unwrap_or("");
        info!(to, bytes = message.len(), "dry run: bounce not sent");
        debug!(message = %text, "dry run message");
        Ok(())
    }
}

/// Sink that keeps messages in memory
///
/// Can be told to fail the next few sends.
#[derive(Debug, Default)]
pub struct MemorySink {
    sent: Mutex<Vec<Vec<u8>>>,
    failures: Mutex<usize>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` sends fail with `SendError::Unavailable`
    pub fn fail_next(&self, count: usize) {
        *self.failures.lock() = count;
    }

    /// Messages accepted so far
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    /// Messages accepted so far, as lossy UTF-8
    pub fn sent_text(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .map(|m| String::from_utf8_lossy(m).into_owned())
            .collect()
    }

    /// Number of messages accepted so far
    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

impl MailSink for MemorySink {
    fn send(&self, message: &[u8]) -> Result<(), SendError> {
        {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(SendError::Unavailable("scripted failure".to_string()));
            }
        }
        self.sent.lock().push(message.to_vec());
        Ok(())
    }
}
