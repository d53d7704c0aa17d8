//! Tiered request admission for the creatorgate gateway.
//!
//! Every protected route is classified into a named [`Policy`] (window length,
//! quota, rejection payload). The [`RateLimiterRegistry`] counts requests per
//! `(policy, key)` in fixed windows and answers each check with a
//! [`Decision`]:
//!
//! - **Allow** -- the request fits in the current window; the returned
//!   [`RateLimitStatus`] feeds the `RateLimit-*` response headers.
//! - **Deny** -- the window is exhausted; the [`Rejection`] renders the 429
//!   body with an absolute `retryAfter` timestamp.
//!
//! Counters live behind the [`CounterStore`] trait. The default
//! [`MemoryStore`] is a sharded [`DashMap`](dashmap::DashMap); a periodic
//! sweep evicts counters idle for two windows so distinct client IPs cannot
//! grow memory without bound.

pub mod clock;
pub mod controller;
pub mod fixed_window;
pub mod policy;
pub mod rejection;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use creatorgate_common::{FailureMode, GateResult, RateLimitConfig};
use tokio::task::JoinHandle;

pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::{AdmissionController, Decision};
pub use fixed_window::{CounterEntry, Quota, WindowSnapshot};
pub use policy::{Policy, PolicyRegistry, PolicySummary};
pub use rejection::{RateLimitStatus, Rejection};
pub use store::{CounterKey, CounterStore, MemoryStore};

/// Process-wide rate limiter, constructed once at startup and handed to the
/// HTTP layer.
///
/// Cheaply cloneable (backed by `Arc`) and safe to share across tasks and
/// threads. Clones share counters and policies.
#[derive(Clone)]
pub struct RateLimiterRegistry {
    inner: Arc<AdmissionController>,
}

/// Builder for [`RateLimiterRegistry`]. Unset parts default to the built-in
/// policies, an in-memory store, the system clock and fail-open.
#[derive(Default)]
pub struct RateLimiterBuilder {
    policies: Option<PolicyRegistry>,
    store: Option<Arc<dyn CounterStore>>,
    clock: Option<Arc<dyn Clock>>,
    failure_mode: FailureMode,
}

impl RateLimiterBuilder {
    pub fn policies(mut self, policies: PolicyRegistry) -> Self {
        self.policies = Some(policies);
        self
    }

    pub fn store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn failure_mode(mut self, failure_mode: FailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }

    pub fn build(self) -> RateLimiterRegistry {
        let policies = self.policies.unwrap_or_else(PolicyRegistry::builtin);

        tracing::info!(
            policies = policies.policies().len(),
            failure_mode = ?self.failure_mode,
            "creating rate limiter registry"
        );

        RateLimiterRegistry {
            inner: Arc::new(AdmissionController::new(
                Arc::new(policies),
                self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
                self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                self.failure_mode,
            )),
        }
    }
}

impl RateLimiterRegistry {
    pub fn builder() -> RateLimiterBuilder {
        RateLimiterBuilder::default()
    }

    /// Build from configuration with the in-memory store and system clock.
    pub fn new(config: &RateLimitConfig) -> GateResult<Self> {
        Ok(Self::builder()
            .policies(PolicyRegistry::from_config(config)?)
            .failure_mode(config.failure_mode)
            .build())
    }

    /// Check whether a request identified by `key` may proceed under the
    /// policy named `policy`.
    ///
    /// An unknown policy is an `Err`, never a silent allow or deny.
    pub fn check(&self, policy: &str, key: &str) -> GateResult<Decision> {
        self.inner.check(policy, key)
    }

    pub fn policies(&self) -> &PolicyRegistry {
        self.inner.policies()
    }

    /// Replace a policy at runtime. Existing counters keep their window start
    /// and are judged against the new quota from their next request on.
    pub fn update_policy(&self, policy: Policy) -> Option<Arc<Policy>> {
        self.inner.policies().upsert(policy)
    }

    /// Current counter for `(policy, key)`.
    pub fn counter(&self, policy: &str, key: &str) -> GateResult<Option<CounterEntry>> {
        self.inner.policies().get(policy)?;
        self.inner.store().get(&CounterKey::new(policy, key))
    }

    /// Forget the counter for `(policy, key)`, restoring its full quota.
    pub fn reset(&self, policy: &str, key: &str) -> GateResult<bool> {
        self.inner.policies().get(policy)?;
        let removed = self.inner.store().reset(&CounterKey::new(policy, key))?;
        if removed {
            tracing::info!(policy, key, "rate limit counter reset");
        }
        Ok(removed)
    }

    /// Evict counters that have been idle for two windows.
    pub fn sweep(&self) -> usize {
        self.inner.store().sweep(self.inner.clock().now())
    }

    pub fn tracked_keys(&self) -> usize {
        self.inner.store().len()
    }

    pub fn backend_failures(&self) -> u64 {
        self.inner.backend_failures()
    }

    pub fn failure_mode(&self) -> FailureMode {
        self.inner.failure_mode()
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.inner.clock().now()
    }

    /// Spawn a background Tokio task that sweeps stale counters every
    /// `interval`. Must be called from within a Tokio runtime. The task holds
    /// a clone of the registry and runs until aborted or the runtime stops.
    pub fn start_sweep_task(&self, interval: Duration) -> JoinHandle<()> {
        let registry = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let removed = registry.sweep();
                tracing::trace!(removed, "rate limiter sweep tick completed");
            }
        })
    }
}
