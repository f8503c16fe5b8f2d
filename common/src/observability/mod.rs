//! Observability for both binaries: `tracing` subscriber setup and the
//! Prometheus registry with its scrape endpoint.

mod metrics;
mod tracing;

pub use metrics::{MetricsContext, MetricsServerConfig};
pub use tracing::init_tracing;
