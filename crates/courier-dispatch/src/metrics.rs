//! Prometheus metrics recorder and dispatch-layer metric names.
//!
//! Every silent-discard path in this crate increments one of the counters
//! named here, so operators can see drops the neutral transport status
//! deliberately hides.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render scrape output. Must be
/// called once at startup by the embedding application before any metrics
/// are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across crates.

/// Messages discarded because no handler was registered for the dispatch ID
/// (counter, labels: path).
pub const DISPATCH_UNROUTABLE_TOTAL: &str = "dispatch_unroutable_total";
/// Live dispatch registry entries (gauge).
pub const DISPATCH_ENTRIES_ACTIVE: &str = "dispatch_entries_active";
/// Lifecycle events dropped for lack of a listener (counter, labels: scope).
pub const EVENTS_UNROUTED_TOTAL: &str = "events_unrouted_total";
/// Cache responses discarded by the identity filter (counter, labels: reason).
pub const CACHE_FILTER_DROPS_TOTAL: &str = "cache_filter_drops_total";
/// Outstanding cache requests (gauge).
pub const CACHE_REQUESTS_OUTSTANDING: &str = "cache_requests_outstanding";
/// Reply messages discarded as unmatched, duplicate, or malformed
/// (counter, labels: reason).
pub const REPLY_DROPS_TOTAL: &str = "reply_drops_total";
/// Pending request/reply correlation entries (gauge).
pub const REPLIES_PENDING: &str = "replies_pending";
/// Subscription confirmations that found no parked waiter (counter).
pub const SUBSCRIPTION_ORPHAN_EVENTS_TOTAL: &str = "subscription_orphan_events_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_and_render() {
        // Build a recorder + handle (no global install to avoid test conflicts).
        let handle = PrometheusBuilder::new().build_recorder().handle();

        // Should produce valid (possibly empty) Prometheus text.
        let output = handle.render();
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            DISPATCH_UNROUTABLE_TOTAL,
            DISPATCH_ENTRIES_ACTIVE,
            EVENTS_UNROUTED_TOTAL,
            CACHE_FILTER_DROPS_TOTAL,
            CACHE_REQUESTS_OUTSTANDING,
            REPLY_DROPS_TOTAL,
            REPLIES_PENDING,
            SUBSCRIPTION_ORPHAN_EVENTS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
