//! Streams plaintext byte ranges of archived files, optionally re-encrypted
//! for the recipient.
//!
//! The entry point is [`engine::TransferEngine`]. It resolves files through a
//! [`metadata::FileMetadataService`], reads stored bytes through a
//! [`fetch::RangeFetcher`] and reports every transfer to an
//! [`audit::AuditSink`].

pub mod audit;
pub mod cache;
pub mod content;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod integrity;
pub mod metadata;
pub mod server;
pub mod signal;

#[cfg(test)]
mod testutil;

pub use {
    engine::{EngineConfig, TransferEngine},
    error::TransferError,
};
