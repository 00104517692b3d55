//! Data types shared across the crate

mod event;

pub use event::{
    DecodeError, DeliveryStatus, Envelope, Event, EventKind, Failure, MessageHeaders,
    MessageInfo, Severity,
};
