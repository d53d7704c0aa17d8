use creatorgate_common::{GateError, GateResult, KeyStrategy, RouteConfig};
use creatorgate_rate_limit::PolicyRegistry;

/// The policy and key strategy a request path maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification<'a> {
    pub policy: &'a str,
    pub key: KeyStrategy,
    /// `false` when no route matched and the default policy applies.
    pub matched: bool,
}

/// Static route table mapping path prefixes to policies.
///
/// Every path resolves to some policy. Paths that match no prefix fall back
/// to the default policy rather than going unlimited.
#[derive(Debug, Clone)]
pub struct RouteClassifier {
    rules: Vec<RouteConfig>,
    default_policy: String,
}

impl RouteClassifier {
    /// Build the table, failing on any policy name the registry lacks.
    pub fn from_config(
        routes: &[RouteConfig],
        default_policy: &str,
        policies: &PolicyRegistry,
    ) -> GateResult<Self> {
        if !policies.contains(default_policy) {
            return Err(GateError::UnknownPolicy(default_policy.to_string()));
        }

        for route in routes {
            if !policies.contains(&route.policy) {
                return Err(GateError::Config(format!(
                    "route '{}' references unknown policy '{}'",
                    route.path_prefix, route.policy
                )));
            }
        }

        let mut rules: Vec<RouteConfig> = routes
            .iter()
            .map(|route| RouteConfig {
                path_prefix: normalize_prefix(&route.path_prefix),
                ..route.clone()
            })
            .collect();
        // Longest prefix first so the most specific route wins.
        rules.sort_by(|a, b| b.path_prefix.len().cmp(&a.path_prefix.len()));

        tracing::info!(
            routes = rules.len(),
            default_policy,
            "route classification table built"
        );

        Ok(Self {
            rules,
            default_policy: default_policy.to_string(),
        })
    }

    /// Map a request path to its policy.
    ///
    /// Matching ignores ASCII case and repeated slashes, the same way the
    /// upstream router resolves paths, so `/API//Auth/login` is still an
    /// auth request.
    pub fn classify(&self, path: &str) -> Classification<'_> {
        let path = collapse_slashes(path);
        self.rules
            .iter()
            .find(|rule| prefix_matches(&rule.path_prefix, &path))
            .map(|rule| Classification {
                policy: &rule.policy,
                key: rule.key,
                matched: true,
            })
            .unwrap_or(Classification {
                policy: &self.default_policy,
                key: KeyStrategy::Ip,
                matched: false,
            })
    }

    pub fn default_policy(&self) -> &str {
        &self.default_policy
    }

    pub fn rules(&self) -> &[RouteConfig] {
        &self.rules
    }
}

/// Join the non-empty segments of `path` with single slashes. Trailing
/// slashes are dropped; the root path stays `/`.
fn collapse_slashes(path: &str) -> String {
    let mut collapsed = String::with_capacity(path.len());
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        collapsed.push('/');
        collapsed.push_str(segment);
    }
    if collapsed.is_empty() {
        collapsed.push('/');
    }
    collapsed
}

/// Route prefixes are stored collapsed, with the root prefix as `""`.
fn normalize_prefix(prefix: &str) -> String {
    let collapsed = collapse_slashes(prefix);
    if collapsed == "/" {
        String::new()
    } else {
        collapsed
    }
}

/// Segment-aware, ASCII case-insensitive prefix match: `/api/auth` covers
/// `/api/auth` and `/API/Auth/login` but not `/api/authors`.
fn prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    if path.len() < prefix.len() || !path.is_char_boundary(prefix.len()) {
        return false;
    }
    let (head, rest) = path.split_at(prefix.len());
    head.eq_ignore_ascii_case(prefix) && (rest.is_empty() || rest.starts_with('/'))
}
