//! LogVault library exports

pub mod analytics;
pub mod cache;
pub mod compose;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod models;
pub mod query;
pub mod reader;
pub mod routes;
pub mod shipper;
pub mod state;
pub mod store;
pub mod uploads;

#[cfg(test)]
mod testing;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides `default_filter`.
pub fn init_tracing(default_filter: &str, json: bool) {
    let registry = tracing_subscriber::registry().with(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
    );

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
