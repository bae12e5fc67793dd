//! Prometheus metrics for the coordinator. All metrics use the
//! `deskflow_` prefix and are read-only from the caller's perspective.

use prometheus::{
    CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge, GenericGaugeVec},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// AnalysisRuns currently in `running`.
    pub active_analyses: GenericGauge<AtomicF64>,
    /// RebalanceRuns currently in `running`.
    pub active_rebalances: GenericGauge<AtomicF64>,
    /// Pending child analyses waiting on the parallelism cap, per rebalance.
    pub rebalance_queue_depth: GenericGaugeVec<AtomicF64>,
    /// Agent dispatches by phase and outcome.
    pub agent_dispatches_total: CounterVec,
    /// Brokerage order submissions by side and outcome.
    pub broker_orders_total: CounterVec,
    /// Brokerage call latency.
    pub broker_latency_seconds: HistogramVec,
    /// Stale analyses reactivated by the sweeper.
    pub stale_reactivations_total: CounterVec,
    /// Schedules fired by the schedule runner.
    pub schedules_fired_total: CounterVec,
    /// Server uptime in seconds.
    pub uptime_seconds: GenericGauge<AtomicF64>,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let active_analyses = Gauge::with_opts(Opts::new("deskflow_active_analyses", "AnalysisRuns currently running"))?;
        registry.register(Box::new(active_analyses.clone()))?;

        let active_rebalances = Gauge::with_opts(Opts::new("deskflow_active_rebalances", "RebalanceRuns currently running"))?;
        registry.register(Box::new(active_rebalances.clone()))?;

        let rebalance_queue_depth = GaugeVec::new(
            Opts::new("deskflow_rebalance_queue_depth", "Pending child analyses per rebalance"),
            &["rebalance_id"],
        )?;
        registry.register(Box::new(rebalance_queue_depth.clone()))?;

        let agent_dispatches_total = CounterVec::new(
            Opts::new("deskflow_agent_dispatches_total", "Agent dispatch attempts by phase and outcome"),
            &["phase", "outcome"],
        )?;
        registry.register(Box::new(agent_dispatches_total.clone()))?;

        let broker_orders_total = CounterVec::new(
            Opts::new("deskflow_broker_orders_total", "Brokerage order submissions by side and outcome"),
            &["side", "outcome"],
        )?;
        registry.register(Box::new(broker_orders_total.clone()))?;

        let broker_latency_seconds = HistogramVec::new(
            HistogramOpts::new("deskflow_broker_latency_seconds", "Brokerage call latency in seconds")
                .buckets(vec![0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["endpoint"],
        )?;
        registry.register(Box::new(broker_latency_seconds.clone()))?;

        let stale_reactivations_total = CounterVec::new(
            Opts::new("deskflow_stale_reactivations_total", "Stale analyses reactivated or failed by the sweeper"),
            &["outcome"],
        )?;
        registry.register(Box::new(stale_reactivations_total.clone()))?;

        let schedules_fired_total = CounterVec::new(
            Opts::new("deskflow_schedules_fired_total", "Schedule rules fired by the schedule runner"),
            &["outcome"],
        )?;
        registry.register(Box::new(schedules_fired_total.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new("deskflow_uptime_seconds", "Server uptime in seconds"))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            active_analyses,
            active_rebalances,
            rebalance_queue_depth,
            agent_dispatches_total,
            broker_orders_total,
            broker_latency_seconds,
            stale_reactivations_total,
            schedules_fired_total,
            uptime_seconds,
        })
    }

    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode_to_string(&metric_families).unwrap_or_default()
    }

    pub fn set_rebalance_queue_depth(&self, rebalance_id: &str, depth: f64) {
        self.rebalance_queue_depth.with_label_values(&[rebalance_id]).set(depth);
    }

    pub fn inc_agent_dispatch(&self, phase: &str, outcome: &str) {
        self.agent_dispatches_total.with_label_values(&[phase, outcome]).inc();
    }

    pub fn inc_broker_order(&self, side: &str, outcome: &str) {
        self.broker_orders_total.with_label_values(&[side, outcome]).inc();
    }

    pub fn observe_broker_latency(&self, endpoint: &str, latency: f64) {
        self.broker_latency_seconds.with_label_values(&[endpoint]).observe(latency);
    }

    pub fn inc_stale_reactivation(&self, outcome: &str) {
        self.stale_reactivations_total.with_label_values(&[outcome]).inc();
    }

    pub fn inc_schedule_fired(&self, outcome: &str) {
        self.schedules_fired_total.with_label_values(&[outcome]).inc();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("failed to build default metrics registry")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_render_with_prefix() {
        let metrics = Metrics::new().expect("metrics should construct");
        assert!(metrics.render().contains("deskflow_"));
    }

    #[test]
    fn active_analyses_gauge_updates() {
        let metrics = Metrics::new().expect("metrics should construct");
        metrics.active_analyses.set(3.0);
        assert!(metrics.render().contains("deskflow_active_analyses 3"));
    }

    #[test]
    fn agent_dispatch_counter_labels() {
        let metrics = Metrics::new().expect("metrics should construct");
        metrics.inc_agent_dispatch("research", "accepted");
        let output = metrics.render();
        assert!(output.contains("deskflow_agent_dispatches_total"));
        assert!(output.contains("research"));
    }
}
