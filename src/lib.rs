//! Regional edge cache kept coherent by a partitioned invalidation stream.

pub mod application;
pub mod bus;
pub mod cache;
pub mod coherence;
pub mod collector;
pub mod config;
pub mod infra;
pub mod origin;
pub mod region;
pub mod util;
