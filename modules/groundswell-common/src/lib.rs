pub mod config;
pub mod error;
pub mod metrics;
pub mod rate_gate;
pub mod types;

pub use config::{Config, RedditCredential};
pub use error::GroundswellError;
pub use metrics::Metrics;
pub use rate_gate::RateGate;
pub use types::*;
