/// Probing pipeline - establishes whether nodes are honestly relaying
///
/// This module is responsible for:
/// - Polling node stats endpoints and judging the activity predicate
/// - Randomized protocol-level spot-checks of healthy nodes
/// - Demoting nodes whose heartbeats have gone stale
/// - Driving each of these as a periodic job with cooperative shutdown
pub mod checker;
pub mod collector;
pub mod prober;
pub mod reaper;
pub mod scheduler;
pub mod types;

pub use checker::{HttpStatsFetcher, ProbeFailure, RelayProber, StatsFetcher};
pub use collector::StatsCollector;
pub use prober::{Jitter, SpotCheckProber, ThreadRngJitter};
pub use reaper::LivenessReaper;
pub use scheduler::{PeriodicJob, ShutdownSignal, run_periodic, shutdown_channel};
pub use types::StatsReport;
