//! Lifecycle services for the warden authorization server
//!
//! This crate keeps the server's long-lived state in shape:
//!
//! * [`config`]: loads the configuration record, watches it for newer
//!   revisions, and publishes each applied snapshot to subscribers
//! * [`rotation`]: generates fresh signing keys ahead of need and prunes
//!   expired ones, with a compare-and-set write on the configuration record
//! * [`keys`]: resolves verification keys locally or from a remote key set,
//!   and signs tokens with the newest live key
//! * [`rpt`] and [`permission`]: UMA requesting party tokens and the
//!   resource set permissions attached to them
//! * [`cleanup`]: the periodic sweep that removes expired grants, clients,
//!   tokens, permissions, device requests and metric samples
//!
//! Background work implements [`timer::Periodic`] and is started with
//! [`timer::spawn_periodic`], or all at once on the configured periods with
//! [`background::Background::start`]. Each piece guards itself so that a
//! tick that overlaps a slow previous tick is skipped rather than queued.
//!
//! Persisted state lives behind the [`store::Store`] trait, and private key
//! material behind [`crypto::CryptoProvider`]. In-memory implementations of
//! both are provided.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod background;
pub mod cleanup;
pub mod config;
pub mod crypto;
pub mod error;
pub mod grant;
pub mod guard;
pub mod keys;
pub mod model;
pub mod paged;
pub mod permission;
pub mod rotation;
pub mod rpt;
pub mod store;
pub mod timer;

#[cfg(test)]
pub(crate) mod test;

#[doc(inline)]
pub use config::{ConfigSnapshot, ConfigurationManager};
#[doc(inline)]
pub use store::{MemoryStore, Store, StoreExt};
