//! Metrics and observability infrastructure.
//!
//! - `events`: internal event types and the `InternalEvent` trait
//! - `recorder`: Prometheus recorder installation and rendering

pub mod events;
mod recorder;

pub use recorder::{MetricsController, init, init_test};

/// Emit a metric event by calling its `InternalEvent::emit()`.
///
/// # Example
///
/// ```ignore
/// use sluice_core::metrics::events::RecordsAccepted;
///
/// emit!(RecordsAccepted { count: 3, stream: "events".to_string() });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}

pub use emit;
