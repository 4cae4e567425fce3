pub mod cache;
pub mod snapshot;

pub use cache::Cache;
pub use snapshot::AccountSnapshot;
