pub mod http;
pub mod metadata;
pub mod token_bucket;

pub use http::{AccountsHttpClient, AccountsSource, ApiConfig, SharedAccountsSource};
pub use metadata::MetadataFetcher;
pub use token_bucket::TokenBucket;
