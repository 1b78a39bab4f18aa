//! Configuration Module
//!
//! Environment-driven configuration for the aggregator.

mod settings;

pub use settings::{
    AggregatorConfig, CacheSettings, ConfigError, Credentials, OrchestratorSettings,
    PollSettings, ReconnectSettings, ServerSettings, StreamSettings,
};
