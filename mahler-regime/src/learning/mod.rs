//! Online parameter learning.

pub mod online_em;

pub use online_em::{
    DailyContribution, OnlineEmConfig, OnlineEmUpdater, StateStatistics, SufficientStatistics,
};
