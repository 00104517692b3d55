//! Durable key-value storage
//!
//! - `KeyedStore`: one directory per store, one file per key
//! - `Stores`: the `events` and `bounced` stores under one data root
//!
//! # Layout
//!
//! ```text
//! <data_root>/
//! ├── events/
//! │   └── <base64url(event id)>    pretty JSON event
//! └── bounced/
//!     └── <base64url(event id)>    true
//! ```

mod atomic;
mod encoding;
mod keyed;
mod stores;

pub use encoding::{decode_filename, encode_filename, MAX_KEY_LEN};
pub use keyed::{KeyedStore, StoreError, StoreResult};
pub use stores::{Stores, BOUNCED_STORE, EVENTS_STORE};
