use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use creatorgate_common::{FailureMode, GateError, GateResult};
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::fixed_window::saturating_add;
use crate::policy::{Policy, PolicyRegistry};
use crate::rejection::{RateLimitStatus, Rejection};
use crate::store::{CounterKey, CounterStore};

/// Result of an admission check.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allow(RateLimitStatus),
    Deny(Rejection),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow(_))
    }

    /// Quota state for response headers.
    pub fn status(&self) -> &RateLimitStatus {
        match self {
            Decision::Allow(status) => status,
            Decision::Deny(rejection) => &rejection.status,
        }
    }
}

/// Fixed-window admission controller over a pluggable counter store.
pub struct AdmissionController {
    policies: Arc<PolicyRegistry>,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    failure_mode: FailureMode,
    backend_failures: AtomicU64,
}

impl AdmissionController {
    pub fn new(
        policies: Arc<PolicyRegistry>,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        failure_mode: FailureMode,
    ) -> Self {
        Self {
            policies,
            store,
            clock,
            failure_mode,
            backend_failures: AtomicU64::new(0),
        }
    }

    /// Decide whether one request from `key` may proceed under `policy_name`.
    ///
    /// Returns `Err` only for wiring mistakes: an unregistered policy or an
    /// empty key. Quota exhaustion is `Ok(Decision::Deny)`, and backend
    /// failures are resolved by the configured [`FailureMode`].
    pub fn check(&self, policy_name: &str, key: &str) -> GateResult<Decision> {
        let policy = self.policies.get(policy_name).inspect_err(|e| {
            error!(policy = policy_name, error = %e, "request routed to unregistered policy");
        })?;

        if key.is_empty() {
            return Err(GateError::Config(format!(
                "empty rate-limit key for policy '{}'",
                policy_name
            )));
        }

        let now = self.clock.now();
        let counter = CounterKey::new(policy.name(), key);

        let snapshot = match self.store.acquire(&counter, &policy.quota(), now) {
            Ok(snapshot) => snapshot,
            Err(e) => return Ok(self.degrade(&policy, key, e)),
        };

        let status = RateLimitStatus {
            policy: policy.name().to_string(),
            limit: policy.max_requests(),
            remaining: policy.max_requests().saturating_sub(snapshot.count),
            reset_at: snapshot.window_end,
            window_secs: policy.window_secs(),
        };

        if snapshot.admitted {
            return Ok(Decision::Allow(status));
        }

        info!(
            policy = policy.name(),
            key,
            retry_after = %snapshot.window_end,
            "request rate limited"
        );

        Ok(Decision::Deny(Rejection {
            message: policy.message().to_string(),
            retry_after: snapshot.window_end,
            extra: policy.extra().clone(),
            status,
        }))
    }

    fn degrade(&self, policy: &Policy, key: &str, err: GateError) -> Decision {
        self.backend_failures.fetch_add(1, Ordering::Relaxed);

        let now = self.clock.now();
        let reset_at = saturating_add(now, policy.window());

        match self.failure_mode {
            FailureMode::Open => {
                warn!(policy = policy.name(), key, error = %err, "counter backend failed, admitting request");
                Decision::Allow(RateLimitStatus {
                    policy: policy.name().to_string(),
                    limit: policy.max_requests(),
                    remaining: policy.max_requests(),
                    reset_at,
                    window_secs: policy.window_secs(),
                })
            }
            FailureMode::Closed => {
                warn!(policy = policy.name(), key, error = %err, "counter backend failed, rejecting request");
                Decision::Deny(Rejection {
                    message: policy.message().to_string(),
                    retry_after: reset_at,
                    extra: policy.extra().clone(),
                    status: RateLimitStatus {
                        policy: policy.name().to_string(),
                        limit: policy.max_requests(),
                        remaining: 0,
                        reset_at,
                        window_secs: policy.window_secs(),
                    },
                })
            }
        }
    }

    pub fn policies(&self) -> &Arc<PolicyRegistry> {
        &self.policies
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    /// Backend failures absorbed by the failure mode since startup.
    pub fn backend_failures(&self) -> u64 {
        self.backend_failures.load(Ordering::Relaxed)
    }
}
