//! Keeping a region's cache coherent with the origin.
//!
//! [`InvalidationCoordinator`] applies bus events by strategy after the
//! region's propagation delay; [`RefreshPool`] rewrites stale entries in the
//! background when they are read.

mod coordinator;
mod refresh;
mod strategy;

pub use coordinator::{Applied, CoordinatorConfig, InvalidationCoordinator};
pub use refresh::{RefreshConfig, RefreshJob, RefreshPool};
pub use strategy::Strategy;

pub(crate) use refresh::{METRIC_REFRESH_FAILURE_TOTAL, METRIC_REFRESH_TOTAL};
