//! Multi-tier rolling statistics
//!
//! Every monitored domain keeps, per metric, an hourly, a daily and a
//! weekly [`TierSeries`]. Samples land in the hourly tier; the first sample
//! of each hour promotes the hourly mean to the daily tier, and the first
//! sample of each day promotes the daily mean to the weekly tier.
//!
//! ```text
//! sample ─► hourly ──(hh:00)──► daily ──(00:00)──► weekly
//!           ≤ N_h               ≤ 24               ≤ 7
//! ```

pub mod series;
pub mod store;

pub use series::{MetricSeries, NO_DATA, TierCapacity, TierSeries};
pub use store::{FlushReport, RollupStore};
