//! service-core: Shared infrastructure for the compliance services.
pub mod config;
pub mod error;
pub mod observability;
pub mod retry;

pub use tracing;
