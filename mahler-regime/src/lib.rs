pub mod changepoint;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod features;
pub mod inference;
pub mod learning;
pub mod model;
pub mod numeric;
pub mod regime;

// Re-export commonly used types
pub use changepoint::{ChangepointConfig, ChangepointDetector, ChangepointOutput, ChangepointState};
pub use config::EngineConfig;
pub use data::{AssetClass, InMemoryFeed, MacroSnapshot, MarketFeed, OhlcvBar, RiskSignals};
pub use engine::{
    DayReport, InMemoryRecordStore, ModelOutcome, RecordSink, RegimeOrchestrator, RegimeRecord,
};
pub use error::{RegimeError, RegimeResult};
pub use features::{FeatureBuilder, FeatureConfig, FeatureStore, FeatureVector};
pub use inference::{InferenceEngine, RegimeInference};
pub use learning::{OnlineEmConfig, OnlineEmUpdater};
pub use model::{InMemoryModelRegistry, ModelRegistry, RegimeModel};
pub use regime::{HysteresisFilter, OverrideRule, OverrideTable, RegimeLabel};
