//! Blob store backends.

pub mod filesystem;
