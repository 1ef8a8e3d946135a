pub mod client;
pub mod robots;
pub mod throttle;
pub mod transport;

pub use client::{backoff_delay, classify, FetchClient, FetchSettings, FetchedPage, Verdict};
pub use robots::RobotsGate;
pub use throttle::Throttle;
pub use transport::{FetchRequest, HttpTransport, RawResponse, ReqwestTransport, TransportError};
