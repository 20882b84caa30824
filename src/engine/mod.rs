//! Drain engine: worker pool, per-item dispatch, and the drain loop.

pub mod backoff;
pub mod dispatch;
pub mod drain;
pub mod pool;

pub use backoff::BackoffPolicy;
pub use dispatch::ItemReport;
pub use drain::{Drain, DrainConfig, DrainReport};
pub use pool::{Slot, WorkerPool};
