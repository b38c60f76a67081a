mod engine;
mod stats;
mod types;

pub use engine::run_valuation;
pub use stats::summarize;
pub use types::{
    DcfStats, Histogram, History, Inputs, MAX_PAYOUT_YEARS, PayoutYearStats, ValuationResult,
    ValuationSummary,
};
