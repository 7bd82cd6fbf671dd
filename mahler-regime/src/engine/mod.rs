//! Daily orchestration and the output record sink.

pub mod orchestrator;
pub mod record;

pub use orchestrator::{AssetState, DayReport, ModelOutcome, RegimeOrchestrator, SkippedAsset};
pub use record::{lineage_hash, InMemoryRecordStore, RecordSink, RegimeRecord};
