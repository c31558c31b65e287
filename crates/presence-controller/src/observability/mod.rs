//! Observability surface: health probes and the Prometheus recorder.

pub mod health;

pub use health::{health_router, HealthState};
