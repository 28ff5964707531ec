//! Observability for the broadcast service.
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit fields.
//! SDP bodies and ICE candidates are never logged at info level or above;
//! they carry peer network addresses.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `bs_presenter_active` | Gauge | none | 1 while a presenter is live |
//! | `bs_viewers_active` | Gauge | none | Connected viewers |
//! | `bs_connections_active` | Gauge | none | Open signaling connections |
//! | `bs_coordinator_mailbox_depth` | Gauge | none | Coordinator backpressure |
//! | `bs_signaling_messages_total` | Counter | `kind` | Inbound messages |
//! | `bs_rejections_total` | Counter | `reason` | Rejected requests |
//! | `bs_outbound_dropped_total` | Counter | none | Messages dropped on full/closed queues |
//! | `bs_negotiation_duration_seconds` | Histogram | `role`, `status` | SDP negotiation time |
//! | `bs_engine_request_duration_seconds` | Histogram | `method` | Media engine round trips |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
