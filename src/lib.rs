//! # DBPS - Data Batch Protection Service
//!
//! A columnar page encryption agent and service for Parquet-compatible data.
//!
//! ## Architecture
//!
//! - `bytes`: length-prefixed byte helpers and the typed value list
//! - `compression`: UNCOMPRESSED / SNAPPY codec adapter
//! - `page`: data page / data page v2 / dictionary page level-byte and
//!   value-byte splitting
//! - `crypto`: the `Encryptor` trait and the reference XOR-based implementation
//! - `sequencer`: the encryption sequencer state machine
//! - `schema`: JSON wire schemas for the encrypt/decrypt endpoints
//! - `auth`: client credential store and JWT bearer tokens
//! - `pool`: per-origin blocking connection pool
//! - `transport`: pooled task client built on top of `pool`
//! - `api`: the axum HTTP server
//! - `agent`: Local and Remote facades over the sequencer

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bytes;
pub mod compression;
pub mod page;
pub mod crypto;
pub mod sequencer;
pub mod schema;
pub mod auth;
pub mod pool;
pub mod transport;
pub mod api;
pub mod agent;

pub use agent::{AgentInit, AgentResult, LocalDataBatchProtectionAgent, RemoteDataBatchProtectionAgent};
pub use sequencer::{DataBatchEncryptionSequencer, SequencerParams};

/// Re-export version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
