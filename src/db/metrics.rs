//! Per-pool request metrics.

use crate::error::{DbError, DbResult};
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramTimer, IntCounter, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::collections::HashMap;

/// Counters and latency histogram of one pool, in a registry labelled with
/// the pool name.
#[derive(Clone)]
pub struct PoolMetrics {
    registry: Registry,
    pub requests: IntCounter,
    pub errors: IntCounter,
    pub cache_hits: IntCounter,
    pub cache_misses: IntCounter,
    /// Requests currently holding a connection
    pub in_flight: IntGauge,
    pub duration: Histogram,
}

impl std::fmt::Debug for PoolMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolMetrics")
            .field("requests", &self.requests.get())
            .field("errors", &self.errors.get())
            .field("in_flight", &self.in_flight.get())
            .finish_non_exhaustive()
    }
}

impl PoolMetrics {
    pub fn new(pool: &str) -> DbResult<Self> {
        let labels = HashMap::from([("pool".to_string(), pool.to_string())]);
        let registry = Registry::new_custom(Some("polydb".to_string()), Some(labels))
            .map_err(metrics_error)?;

        let counter = |name: &str, help: &str| -> DbResult<IntCounter> {
            let c = IntCounter::with_opts(Opts::new(name, help)).map_err(metrics_error)?;
            registry.register(Box::new(c.clone())).map_err(metrics_error)?;
            Ok(c)
        };
        let requests = counter("requests_total", "Operations executed")?;
        let errors = counter("errors_total", "Operations that failed")?;
        let cache_hits = counter("cache_hits_total", "Cached reads served from the cache")?;
        let cache_misses = counter("cache_misses_total", "Cached reads that went to the backend")?;

        let in_flight = IntGauge::with_opts(Opts::new("in_flight", "Requests holding a connection"))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(in_flight.clone()))
            .map_err(metrics_error)?;

        let duration = Histogram::with_opts(HistogramOpts::new(
            "request_duration_seconds",
            "Time spent executing a request",
        ))
        .map_err(metrics_error)?;
        registry
            .register(Box::new(duration.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            requests,
            errors,
            cache_hits,
            cache_misses,
            in_flight,
            duration,
        })
    }

    pub fn start_timer(&self) -> HistogramTimer {
        self.duration.start_timer()
    }

    /// Render in the Prometheus text exposition format.
    pub fn encode(&self) -> DbResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| DbError::internal(e.to_string()))
    }
}

fn metrics_error(err: prometheus::Error) -> DbError {
    DbError::internal(format!("metrics: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_pool_label() {
        let m = PoolMetrics::new("main").unwrap();
        m.requests.inc();
        m.errors.inc();
        let text = m.encode().unwrap();
        assert!(text.contains("polydb_requests_total{pool=\"main\"} 1"));
        assert!(text.contains("polydb_errors_total{pool=\"main\"} 1"));
        assert!(text.contains("polydb_request_duration_seconds"));
    }

    #[test]
    fn test_timer_observes() {
        let m = PoolMetrics::new("t").unwrap();
        m.start_timer().observe_duration();
        assert_eq!(m.duration.get_sample_count(), 1);
    }
}
