//! HTTP request handlers.

pub mod common;
pub mod files;
pub mod folders;
pub mod health;
pub mod transactions;

pub use common::*;
pub use files::*;
pub use folders::*;
pub use health::*;
pub use transactions::*;
