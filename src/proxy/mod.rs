pub mod manager;

pub use manager::{ProxyEntry, ProxyHealth, ProxyPool};
