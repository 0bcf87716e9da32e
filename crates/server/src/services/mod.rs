//! Size accounting services on top of the metadata store, size cache and
//! blob store.

pub mod error;
pub mod mutations;
pub mod settlement;

pub use error::{ServiceError, ServiceResult};
pub use mutations::{FolderListing, MutationService};
pub use settlement::{SettlementEngine, StartedTransaction};
