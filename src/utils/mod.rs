//! Utility functions and helpers
//!
//! Cancellation, timestamps and host lookup.

pub mod cancel;
pub mod time;

pub use cancel::CancelToken;
pub use time::{format_datetime, format_timestamp, local_hostname};
