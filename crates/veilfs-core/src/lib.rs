//! veilfs-core: shared types for the E2EE folder metadata subsystem
//!
//! This crate carries the pieces every other veilfs crate needs:
//! the error taxonomy, the account context (who is decrypting, with which
//! key material), and the transport contract the metadata layer consumes.

pub mod account;
pub mod error;
pub mod transport;

pub use account::Account;
pub use error::{MetadataError, MetadataResult};
pub use transport::MetadataTransport;
