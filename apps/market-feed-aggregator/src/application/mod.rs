//! Application Layer - Ports and processing services.
//!
//! This layer sits between the pure domain algorithms and the adapters that
//! talk to providers, subscribers and the cache.

/// Port interfaces for external systems (cache store).
pub mod ports;

/// Processing pipeline and charting-protocol query services.
pub mod services;
