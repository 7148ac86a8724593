//! Request-serving logic between the HTTP surface and the cache.

pub mod error;
pub mod handler;

pub use error::{AppError, ErrorReport, ServeError};
pub use handler::{Freshness, Health, RequestHandler, ServeSource, Served};
