use std::collections::{BTreeMap, BTreeSet};

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{GateError, GateResult};

/// Prefix for every environment variable override.
pub const ENV_PREFIX: &str = "CREATORGATE";

pub const GENERAL: &str = "general";
pub const AUTH: &str = "auth";
pub const AI_INSIGHTS: &str = "ai-insights";
pub const PLATFORM_CONNECT: &str = "platform-connect";

/// Keys a policy's extra fields may not use, since the rejection body owns them.
pub const RESERVED_REJECTION_FIELDS: [&str; 2] = ["error", "retryAfter"];

/// Longest window a policy may use: 366 days.
pub const MAX_WINDOW_SECS: u64 = 366 * 24 * 60 * 60;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Peers allowed to supply the client address via `X-Forwarded-For`.
    #[serde(default)]
    pub trusted_proxies: Vec<IpNet>,
    /// Base URL of the API server admitted requests are forwarded to.
    #[serde(default)]
    pub upstream: Option<String>,
    #[serde(default = "default_body_limit")]
    pub request_body_limit: usize,
    #[serde(default)]
    pub admin: AdminConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            trusted_proxies: vec![],
            upstream: None,
            request_body_limit: default_body_limit(),
            admin: AdminConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_listen")]
    pub listen: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            listen: default_admin_listen(),
            enabled: true,
        }
    }
}

/// What the admission controller does when its counter backend fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Admit the request and log a warning.
    #[default]
    Open,
    /// Reject the request as if the quota were exhausted.
    Closed,
}

impl std::str::FromStr for FailureMode {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(FailureMode::Open),
            "closed" => Ok(FailureMode::Closed),
            other => Err(GateError::Config(format!(
                "failure mode must be 'open' or 'closed', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub failure_mode: FailureMode,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Policy applied to routes that match no entry in `routes`.
    #[serde(default = "default_policy_name")]
    pub default_policy: String,
    /// Per-field overrides merged over the built-in policy table. Names that
    /// are not built in define new policies and must set every field.
    #[serde(default)]
    pub policies: BTreeMap<String, PolicyConfig>,
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            failure_mode: FailureMode::Open,
            sweep_interval_secs: default_sweep_interval(),
            default_policy: default_policy_name(),
            policies: BTreeMap::new(),
            routes: default_routes(),
        }
    }
}

/// Optional overrides for a single policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub window_secs: Option<u64>,
    pub max_requests: Option<u64>,
    pub message: Option<String>,
    pub extra: Option<Map<String, Value>>,
}

/// A fully resolved policy definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySpec {
    pub name: String,
    pub window_secs: u64,
    pub max_requests: u64,
    pub message: String,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

/// How the rate-limit key is derived from a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// Client IP only. Rotating identities cannot buy extra attempts.
    #[default]
    Ip,
    /// Client IP combined with the authenticated principal, when present.
    IpAndPrincipal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub path_prefix: String,
    pub policy: String,
    #[serde(default)]
    pub key: KeyStrategy,
}

impl RouteConfig {
    fn new(path_prefix: &str, policy: &str, key: KeyStrategy) -> Self {
        Self {
            path_prefix: path_prefix.to_string(),
            policy: policy.to_string(),
            key,
        }
    }
}

// Default value helpers
fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_admin_listen() -> String {
    "127.0.0.1:9090".to_string()
}
fn default_true() -> bool {
    true
}
fn default_body_limit() -> usize {
    13_107_200 // ~12.5 MB
}
fn default_sweep_interval() -> u64 {
    60
}
fn default_policy_name() -> String {
    GENERAL.to_string()
}
fn default_routes() -> Vec<RouteConfig> {
    vec![
        RouteConfig::new("/api/auth", AUTH, KeyStrategy::Ip),
        RouteConfig::new("/api/ai", AI_INSIGHTS, KeyStrategy::IpAndPrincipal),
        RouteConfig::new("/api/insights", AI_INSIGHTS, KeyStrategy::IpAndPrincipal),
        RouteConfig::new("/api/platforms", PLATFORM_CONNECT, KeyStrategy::Ip),
        RouteConfig::new("/api/oauth", PLATFORM_CONNECT, KeyStrategy::Ip),
    ]
}

/// The built-in policy table.
pub fn builtin_policies() -> Vec<PolicySpec> {
    let mut ai_extra = Map::new();
    ai_extra.insert("upgradeUrl".to_string(), Value::from("/pricing"));

    vec![
        PolicySpec {
            name: GENERAL.to_string(),
            window_secs: 15 * 60,
            max_requests: 100,
            message: "Too many requests from this IP, please try again later.".to_string(),
            extra: Map::new(),
        },
        PolicySpec {
            name: AUTH.to_string(),
            window_secs: 15 * 60,
            max_requests: 5,
            message: "Too many authentication attempts, please try again later.".to_string(),
            extra: Map::new(),
        },
        PolicySpec {
            name: AI_INSIGHTS.to_string(),
            window_secs: 60 * 60,
            max_requests: 10,
            message: "Too many AI insight requests. Upgrade your plan for a higher limit."
                .to_string(),
            extra: ai_extra,
        },
        PolicySpec {
            name: PLATFORM_CONNECT.to_string(),
            window_secs: 60 * 60,
            max_requests: 5,
            message: "Too many platform connection attempts, please try again later.".to_string(),
            extra: Map::new(),
        },
    ]
}

/// Environment variable name for one policy field, e.g.
/// `CREATORGATE_AI_INSIGHTS_MAX_REQUESTS`.
pub fn policy_env_var(policy: &str, field: &str) -> String {
    format!(
        "{}_{}_{}",
        ENV_PREFIX,
        policy.to_ascii_uppercase().replace('-', "_"),
        field
    )
}

impl PolicySpec {
    /// Check the invariants every policy must satisfy.
    pub fn validate(&self) -> GateResult<()> {
        let invalid = |reason: &str| GateError::InvalidPolicy {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.window_secs == 0 {
            return Err(invalid("window_secs must be greater than zero"));
        }
        if self.window_secs > MAX_WINDOW_SECS {
            return Err(invalid(&format!(
                "window_secs must not exceed {}",
                MAX_WINDOW_SECS
            )));
        }
        if self.max_requests == 0 {
            return Err(invalid("max_requests must be greater than zero"));
        }
        for reserved in RESERVED_REJECTION_FIELDS {
            if self.extra.contains_key(reserved) {
                return Err(invalid(&format!(
                    "extra field '{}' is reserved by the rejection body",
                    reserved
                )));
            }
        }
        Ok(())
    }

    fn merge(&mut self, overrides: &PolicyConfig) {
        if let Some(window_secs) = overrides.window_secs {
            self.window_secs = window_secs;
        }
        if let Some(max_requests) = overrides.max_requests {
            self.max_requests = max_requests;
        }
        if let Some(ref message) = overrides.message {
            self.message = message.clone();
        }
        if let Some(ref extra) = overrides.extra {
            self.extra = extra.clone();
        }
    }
}

impl RateLimitConfig {
    /// Merge the configured overrides over the built-in table.
    pub fn resolved_policies(&self) -> GateResult<Vec<PolicySpec>> {
        let mut resolved: BTreeMap<String, PolicySpec> = builtin_policies()
            .into_iter()
            .map(|spec| (spec.name.clone(), spec))
            .collect();

        for (name, overrides) in &self.policies {
            match resolved.get_mut(name) {
                Some(spec) => spec.merge(overrides),
                None => {
                    let missing = |field: &str| GateError::InvalidPolicy {
                        name: name.clone(),
                        reason: format!("custom policy must set '{}'", field),
                    };
                    let spec = PolicySpec {
                        name: name.clone(),
                        window_secs: overrides.window_secs.ok_or_else(|| missing("window_secs"))?,
                        max_requests: overrides
                            .max_requests
                            .ok_or_else(|| missing("max_requests"))?,
                        message: overrides.message.clone().ok_or_else(|| missing("message"))?,
                        extra: overrides.extra.clone().unwrap_or_default(),
                    };
                    resolved.insert(name.clone(), spec);
                }
            }
        }

        let specs: Vec<PolicySpec> = resolved.into_values().collect();
        for spec in &specs {
            spec.validate()?;
        }
        Ok(specs)
    }
}

impl AppConfig {
    /// Load configuration from a YAML file, then apply environment overrides.
    pub fn load(path: &str) -> GateResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from YAML. An empty document yields the defaults.
    pub fn from_yaml(content: &str) -> GateResult<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply `CREATORGATE_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> GateResult<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides read through `lookup`, which maps a variable name to
    /// its value.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> GateResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen) = lookup(&format!("{}_LISTEN", ENV_PREFIX)) {
            self.server.listen = listen;
        }
        if let Some(listen) = lookup(&format!("{}_ADMIN_LISTEN", ENV_PREFIX)) {
            self.server.admin.listen = listen;
        }
        if let Some(upstream) = lookup(&format!("{}_UPSTREAM", ENV_PREFIX)) {
            self.server.upstream = Some(upstream);
        }
        if let Some(mode) = lookup(&format!("{}_FAILURE_MODE", ENV_PREFIX)) {
            self.rate_limit.failure_mode = mode.parse()?;
        }

        let names: BTreeSet<String> = builtin_policies()
            .into_iter()
            .map(|spec| spec.name)
            .chain(self.rate_limit.policies.keys().cloned())
            .collect();

        for name in names {
            let window = lookup(&policy_env_var(&name, "WINDOW_SECS"))
                .map(|v| parse_env_u64(&name, "WINDOW_SECS", &v))
                .transpose()?;
            let max = lookup(&policy_env_var(&name, "MAX_REQUESTS"))
                .map(|v| parse_env_u64(&name, "MAX_REQUESTS", &v))
                .transpose()?;

            if window.is_none() && max.is_none() {
                continue;
            }

            let entry = self.rate_limit.policies.entry(name.clone()).or_default();
            if window.is_some() {
                entry.window_secs = window;
            }
            if max.is_some() {
                entry.max_requests = max;
            }
            tracing::debug!(policy = %name, ?window, ?max, "applied policy override from environment");
        }

        Ok(())
    }

    /// Validate the configuration for consistency.
    pub fn validate(&self) -> GateResult<()> {
        if self.server.listen.trim().is_empty() {
            return Err(GateError::Config("server.listen must not be empty".into()));
        }
        if self.server.admin.enabled && self.server.admin.listen.trim().is_empty() {
            return Err(GateError::Config(
                "server.admin.listen must not be empty when the admin API is enabled".into(),
            ));
        }
        if let Some(ref upstream) = self.server.upstream {
            if !(upstream.starts_with("http://") || upstream.starts_with("https://")) {
                return Err(GateError::Config(format!(
                    "server.upstream must be an http(s) URL, got '{}'",
                    upstream
                )));
            }
        }
        if self.rate_limit.sweep_interval_secs == 0 {
            return Err(GateError::Config(
                "rate_limit.sweep_interval_secs must be greater than zero".into(),
            ));
        }

        let policies = self.rate_limit.resolved_policies()?;
        let known = |name: &str| policies.iter().any(|p| p.name == name);

        if !known(&self.rate_limit.default_policy) {
            return Err(GateError::UnknownPolicy(self.rate_limit.default_policy.clone()));
        }

        for route in &self.rate_limit.routes {
            if !route.path_prefix.starts_with('/') {
                return Err(GateError::Config(format!(
                    "route prefix '{}' must start with '/'",
                    route.path_prefix
                )));
            }
            if !known(&route.policy) {
                return Err(GateError::Config(format!(
                    "route '{}' references unknown policy '{}'",
                    route.path_prefix, route.policy
                )));
            }
        }

        Ok(())
    }
}

fn parse_env_u64(policy: &str, field: &str, value: &str) -> GateResult<u64> {
    value.trim().parse::<u64>().map_err(|_| {
        GateError::Config(format!(
            "{} must be an unsigned integer, got '{}'",
            policy_env_var(policy, field),
            value
        ))
    })
}
