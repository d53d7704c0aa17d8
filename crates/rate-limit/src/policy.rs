use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::Duration;
use creatorgate_common::config::builtin_policies;
use creatorgate_common::{GateError, GateResult, PolicySpec, RateLimitConfig};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::fixed_window::Quota;

/// An immutable, validated rate-limit policy.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    name: String,
    window: Duration,
    max_requests: u64,
    message: String,
    extra: Map<String, Value>,
}

/// Serializable view of a policy, as reported by the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct PolicySummary {
    pub name: String,
    pub window_secs: u64,
    pub max_requests: u64,
    pub message: String,
    pub extra: Map<String, Value>,
}

impl Policy {
    pub fn from_spec(spec: &PolicySpec) -> GateResult<Self> {
        spec.validate()?;

        let window = Duration::from_std(std::time::Duration::from_secs(spec.window_secs))
            .map_err(|_| GateError::InvalidPolicy {
                name: spec.name.clone(),
                reason: "window_secs is out of range".into(),
            })?;

        Ok(Self {
            name: spec.name.clone(),
            window,
            max_requests: spec.max_requests,
            message: spec.message.clone(),
            extra: spec.extra.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn window_secs(&self) -> u64 {
        self.window.num_seconds().max(0) as u64
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Additional fields merged into every rejection body for this policy.
    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    pub fn quota(&self) -> Quota {
        Quota {
            max_requests: self.max_requests,
            window: self.window,
        }
    }

    pub fn to_spec(&self) -> PolicySpec {
        PolicySpec {
            name: self.name.clone(),
            window_secs: self.window_secs(),
            max_requests: self.max_requests,
            message: self.message.clone(),
            extra: self.extra.clone(),
        }
    }

    pub fn summary(&self) -> PolicySummary {
        let spec = self.to_spec();
        PolicySummary {
            name: spec.name,
            window_secs: spec.window_secs,
            max_requests: spec.max_requests,
            message: spec.message,
            extra: spec.extra,
        }
    }
}

/// Named policy table.
///
/// Reads are lock-free. Updates swap in a new table, so a request in flight
/// sees either the old or the new policy, never a mix.
pub struct PolicyRegistry {
    policies: ArcSwap<HashMap<String, Arc<Policy>>>,
}

impl PolicyRegistry {
    pub fn new(policies: impl IntoIterator<Item = Policy>) -> Self {
        let table: HashMap<String, Arc<Policy>> = policies
            .into_iter()
            .map(|p| (p.name.clone(), Arc::new(p)))
            .collect();
        Self {
            policies: ArcSwap::from_pointee(table),
        }
    }

    /// The four built-in policies: general, auth, ai-insights and
    /// platform-connect.
    pub fn builtin() -> Self {
        Self::from_specs(&builtin_policies())
            .expect("built-in policy table must be valid")
    }

    /// Built-in policies with the configured overrides merged in.
    pub fn from_config(config: &RateLimitConfig) -> GateResult<Self> {
        Self::from_specs(&config.resolved_policies()?)
    }

    pub fn from_specs(specs: &[PolicySpec]) -> GateResult<Self> {
        let policies = specs
            .iter()
            .map(Policy::from_spec)
            .collect::<GateResult<Vec<_>>>()?;
        Ok(Self::new(policies))
    }

    /// Look up a policy. An unknown name is a wiring error.
    pub fn get(&self, name: &str) -> GateResult<Arc<Policy>> {
        self.policies
            .load()
            .get(name)
            .cloned()
            .ok_or_else(|| GateError::UnknownPolicy(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.policies.load().contains_key(name)
    }

    /// All policies, sorted by name.
    pub fn policies(&self) -> Vec<Arc<Policy>> {
        let mut all: Vec<Arc<Policy>> = self.policies.load().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Insert or replace a policy. Returns the policy it replaced, if any.
    pub fn upsert(&self, policy: Policy) -> Option<Arc<Policy>> {
        let policy = Arc::new(policy);
        let mut replaced = None;
        self.policies.rcu(|current| {
            let mut next = HashMap::clone(current);
            replaced = next.insert(policy.name.clone(), Arc::clone(&policy));
            next
        });

        tracing::info!(
            policy = %policy.name,
            window_secs = policy.window.num_seconds(),
            max_requests = policy.max_requests,
            "policy updated"
        );

        replaced
    }
}
