pub mod logging;
pub mod metrics;
pub mod user_agents;

// Re-export common functions and types
pub use logging::{default_log_file, init_logging};
pub use metrics::RunStats;
pub use user_agents::resolve_user_agent;
