//! Core domain types shared across canopy crates.
//!
//! This crate defines the vocabulary the other crates agree on:
//! - Upload transaction lifecycle states
//! - Human-readable size formatting
//! - Configuration for the server, metadata store, size cache and blob store

pub mod config;
pub mod error;
pub mod size;
pub mod transaction;

pub use error::{Error, Result};
pub use size::{format_size, non_negative};
pub use transaction::TransactionStatus;
