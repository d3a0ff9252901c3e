use tracing::trace;

// Lightweight metrics helpers that stay safe without a recorder installed.
// The Prometheus endpoint picks up whatever the exporter collects; these
// trace events are the always-on fallback signal.

pub fn inc_requests(route: &'static str) {
    trace!(target = "torii.metrics", route = route, "requests_total_inc");
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "torii.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}
