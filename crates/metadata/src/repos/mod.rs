//! Repository traits for metadata operations.

pub mod files;
pub mod folders;
pub mod transactions;

pub use files::FileRepo;
pub use folders::FolderRepo;
pub use transactions::TransactionRepo;
