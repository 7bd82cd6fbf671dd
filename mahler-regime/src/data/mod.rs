pub mod feed;
pub mod synthetic;
pub mod types;

pub use feed::{InMemoryFeed, MarketFeed};
pub use synthetic::{build_feed, macro_series, Segment, SyntheticPath};
pub use types::{AssetClass, MacroSnapshot, OhlcvBar, RiskSignals};
