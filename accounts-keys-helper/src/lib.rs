pub mod proxy_client;

pub use proxy_client::{ProxyClient, AUTHORIZED_KEYS_TIMEOUT, DEFAULT_TIMEOUT};
