//! Configuration-driven data extraction.
//!
//! A job description selects one of three strategies (static HTML, a
//! WebDriver-controlled browser, or a JSON API). The [`crawler::JobRunner`]
//! walks its targets through a throttled, robots-aware [`fetch::FetchClient`],
//! extracts records, and normalizes them with a [`processing::RuleEngine`].

pub mod browser;
pub mod cli;
pub mod crawler;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod processing;
pub mod proxy;
pub mod storage;
pub mod utils;

pub use crawler::{JobRunner, RunOutput};
pub use error::JobError;
