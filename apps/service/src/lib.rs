//! Trust and payout engine for a swarm of volunteer relay nodes.
//!
//! The worker binary hosts the probing loops; the API server uses the same
//! services through [`Coordinator`].

pub mod config;
pub mod dashboard;
pub mod database;
pub mod economics;
pub mod error;
pub mod heartbeat;
pub mod lifecycle;
pub mod monitoring;
pub mod orchestrator;
pub mod payout;
pub mod pool;
pub mod validation;

use std::sync::Arc;

pub use config::Config;
pub use database::{Database, DatabaseImpl};
pub use economics::EconomicsLedger;
pub use error::{CoordinatorError, CoordinatorResult};
pub use heartbeat::HeartbeatRegistrar;
pub use lifecycle::LifecycleManager;
pub use payout::PayoutEngine;

/// The request-driven services, sharing one database
#[derive(Clone)]
pub struct Coordinator {
    pub database: Arc<dyn Database>,
    pub lifecycle: LifecycleManager,
    pub heartbeats: HeartbeatRegistrar,
    pub payouts: PayoutEngine,
    pub economics: EconomicsLedger,
}

impl Coordinator {
    pub fn new(database: Arc<dyn Database>, config: &Config) -> Self {
        Self {
            lifecycle: LifecycleManager::new(database.clone()),
            heartbeats: HeartbeatRegistrar::new(database.clone()),
            payouts: PayoutEngine::new(database.clone(), config.payout.penalty_factor),
            economics: EconomicsLedger::new(database.clone(), config.economics.clone()),
            database,
        }
    }

    pub fn from_pool(pool: pool::LibsqlPool, config: &Config) -> Self {
        Self::new(Arc::new(DatabaseImpl::new_from_pool(pool)), config)
    }
}
