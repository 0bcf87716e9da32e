pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{TestBlobs, seeded_bytes};
