mod filters;
mod input_stats;
mod network_time;
mod soft_time;
mod tick_sync;

pub use filters::{StabilizedMaxFilter, TrimmedMeanFilter};
pub use input_stats::InputStats;
pub use network_time::{frame_delta, NetworkFrame, NetworkTime};
pub use soft_time::{SoftTime, SoftTimeSettings, SoftTimeStep};
pub use tick_sync::TickSynchronizer;
