//! Metrics collection for budgeting outcomes

use prometheus::{
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_with_registry, Counter, CounterVec, Encoder, Histogram, Opts, Registry,
    TextEncoder,
};
use once_cell::sync::Lazy;
use std::sync::Arc;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| {
    Arc::new(Metrics::new().expect("Failed to initialize metrics"))
});

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    /// Fit calls by the stage that produced the result
    pub fit_total: CounterVec,
    pub turns_evicted: Counter,
    pub fit_units: Histogram,
    pub budget_overflows: Counter,
}

impl Metrics {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let fit_total = register_counter_vec_with_registry!(
            Opts::new("context_fit_total", "Total transcript fits by resulting stage"),
            &["stage"],
            registry
        )?;

        let turns_evicted = register_counter_with_registry!(
            Opts::new("context_turns_evicted_total", "Total turns evicted from transcripts"),
            registry
        )?;

        let fit_units = register_histogram_with_registry!(
            "context_fit_units",
            "Estimated units of fitted transcripts",
            vec![64.0, 256.0, 1024.0, 2048.0, 4096.0, 8192.0, 32768.0, 131072.0],
            registry
        )?;

        let budget_overflows = register_counter_with_registry!(
            Opts::new(
                "context_budget_overflows_total",
                "Fitted transcripts still over the available budget"
            ),
            registry
        )?;

        Ok(Self {
            registry,
            fit_total,
            turns_evicted,
            fit_units,
            budget_overflows,
        })
    }

    /// Record one fit
    pub fn record_fit(&self, stage: &str, units_after: usize, evicted: usize, within_budget: bool) {
        self.fit_total.with_label_values(&[stage]).inc();
        self.fit_units.observe(units_after as f64);
        if evicted > 0 {
            self.turns_evicted.inc_by(evicted as f64);
        }
        if !within_budget {
            self.budget_overflows.inc();
        }
    }

    /// Export metrics in Prometheus text format
    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
