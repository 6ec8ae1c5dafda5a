//! Process-wide logging setup shared by the worker and the API server.

mod subscriber;

pub use subscriber::{init, init_with_level, try_init};
pub use tracing::level_filters::LevelFilter;
