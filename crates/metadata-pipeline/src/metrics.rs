//! A thin trait over the `metrics` crate's macros so the Saver doesn't
//! need to know whether a recorder is installed. No Prometheus exporter
//! is set up here; wiring one up (or not) is left to the binary that
//! installs a recorder.

pub trait MetricsSink: Send + Sync {
    fn dec_gauge(&self, name: &'static str, network: &str, entity_kind: &str);
    fn increment_counter(&self, name: &'static str, network: &str, entity_kind: &str, status: &str);
}

/// Default sink: records through whatever global `metrics` recorder is
/// installed, or drops the observations silently if none is.
pub struct GlobalMetricsSink;

impl MetricsSink for GlobalMetricsSink {
    fn dec_gauge(&self, name: &'static str, network: &str, entity_kind: &str) {
        metrics::gauge!(name, "network" => network.to_string(), "kind" => entity_kind.to_string()).decrement(1.0);
    }

    fn increment_counter(&self, name: &'static str, network: &str, entity_kind: &str, status: &str) {
        metrics::counter!(
            name,
            "network" => network.to_string(),
            "kind" => entity_kind.to_string(),
            "status" => status.to_string(),
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_sink_does_not_panic_without_an_installed_recorder() {
        let sink = GlobalMetricsSink;
        sink.dec_gauge("metadata_new", "mainnet", "token");
        sink.increment_counter("metadata_counter", "mainnet", "token", "applied");
    }
}
