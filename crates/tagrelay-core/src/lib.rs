//! # tagrelay-core
//!
//! Foundation types shared by every TagRelay crate.
//!
//! - [`Attributes`]: key/value tag bundle identifying a connection or
//!   addressing a message, with the fuzzy-subset match relation
//! - [`envelope`]: the `{target, notification, sendSynchronicity}` wire
//!   envelope and its JSON → BSON fallback decoder
//! - [`logging`]: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod attributes;
pub mod envelope;
pub mod errors;
pub mod logging;

pub use attributes::Attributes;
pub use envelope::{Notification, decode_notification};
pub use errors::DecodeError;
