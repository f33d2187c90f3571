//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! channel, websocket and server modules produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → stdout (fmt layer)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Connection ID flows through every channel log line
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
