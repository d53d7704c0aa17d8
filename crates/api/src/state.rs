use std::sync::Arc;

use creatorgate_common::{AppConfig, GateResult};
use creatorgate_rate_limit::RateLimiterRegistry;
use ipnet::IpNet;
use prometheus::{IntCounterVec, IntGauge, Opts, Registry};

use crate::classify::RouteClassifier;

/// Shared state type alias used by the guard and every admin handler.
pub type SharedState = Arc<AppState>;

/// Central application state: the rate limiter, route table and metrics.
pub struct AppState {
    pub config: AppConfig,
    pub limiter: RateLimiterRegistry,
    pub classifier: RouteClassifier,
    pub trusted_proxies: Vec<IpNet>,
    pub metrics: GateMetrics,
    pub start_time: std::time::Instant,
}

/// Prometheus metrics collected by the gateway.
pub struct GateMetrics {
    pub registry: Registry,
    pub requests_total: IntCounterVec,
    pub rate_limited_total: IntCounterVec,
    pub backend_failures: IntGauge,
    pub tracked_keys: IntGauge,
}

impl GateMetrics {
    /// Create all counters and gauges, registered against a fresh registry.
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new(
                "creatorgate_requests_total",
                "Requests checked against a rate-limit policy",
            ),
            &["policy"],
        )
        .expect("failed to create requests_total counter");

        let rate_limited_total = IntCounterVec::new(
            Opts::new(
                "creatorgate_rate_limited_total",
                "Requests rejected with 429 by a rate-limit policy",
            ),
            &["policy"],
        )
        .expect("failed to create rate_limited_total counter");

        let backend_failures = IntGauge::with_opts(Opts::new(
            "creatorgate_backend_failures",
            "Counter backend failures absorbed by the failure mode since startup",
        ))
        .expect("failed to create backend_failures gauge");

        let tracked_keys = IntGauge::with_opts(Opts::new(
            "creatorgate_tracked_keys",
            "Rate-limit counters currently held in memory",
        ))
        .expect("failed to create tracked_keys gauge");

        registry.register(Box::new(requests_total.clone())).expect("failed to register requests_total");
        registry.register(Box::new(rate_limited_total.clone())).expect("failed to register rate_limited_total");
        registry.register(Box::new(backend_failures.clone())).expect("failed to register backend_failures");
        registry.register(Box::new(tracked_keys.clone())).expect("failed to register tracked_keys");

        Self {
            registry,
            requests_total,
            rate_limited_total,
            backend_failures,
            tracked_keys,
        }
    }
}

impl Default for GateMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    /// Build state from configuration with an in-memory limiter.
    pub fn new(config: AppConfig) -> GateResult<Self> {
        let limiter = RateLimiterRegistry::new(&config.rate_limit)?;
        Self::with_limiter(config, limiter)
    }

    /// Build state around an existing limiter (custom clock or store).
    ///
    /// Fails if any route names a policy the limiter does not know.
    pub fn with_limiter(config: AppConfig, limiter: RateLimiterRegistry) -> GateResult<Self> {
        let classifier = RouteClassifier::from_config(
            &config.rate_limit.routes,
            &config.rate_limit.default_policy,
            limiter.policies(),
        )?;

        Ok(Self {
            trusted_proxies: config.server.trusted_proxies.clone(),
            config,
            limiter,
            classifier,
            metrics: GateMetrics::new(),
            start_time: std::time::Instant::now(),
        })
    }

    /// Copy limiter-owned figures into the gauges before a scrape.
    pub fn refresh_gauges(&self) {
        self.metrics
            .tracked_keys
            .set(self.limiter.tracked_keys() as i64);
        self.metrics
            .backend_failures
            .set(self.limiter.backend_failures() as i64);
    }
}
