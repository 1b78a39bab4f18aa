//! Domain Layer - Canonical records and pure market-data algorithms.
//!
//! Nothing here performs I/O. Types are plain Rust with serde support; the
//! stateful pieces (`AggregationEngine`, `IndicatorCalculator`,
//! `TrendlineStore`) expect their caller to serialize access.

/// Canonical record, resolution and `SymbolKey` types.
pub mod record;

/// Provider-specific raw record to canonical record mapping.
pub mod normalize;

/// Fixed-count tumbling window aggregation.
pub mod aggregation;

/// Rolling history and technical indicators.
pub mod indicators;

/// Subscription tracking and management.
pub mod subscription;

/// Probability point history for event providers.
pub mod trendline;
