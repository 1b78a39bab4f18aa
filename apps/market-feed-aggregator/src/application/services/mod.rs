//! Application Services
//!
//! Services that run domain logic on behalf of the adapters.
//!
//! - `ProcessingPipeline`: sharded indicator + aggregation stage
//! - `udf`: charting-protocol history and metadata

pub mod pipeline;
pub mod udf;

pub use pipeline::{EnrichedRecord, ProcessingPipeline};
pub use udf::{HistoryRange, HistoryResponse, SymbolInfo, UdfConfig};
