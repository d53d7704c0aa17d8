use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use creatorgate_common::config::{AI_INSIGHTS, AUTH, GENERAL, PLATFORM_CONNECT};
use creatorgate_rate_limit::{
    Clock, Decision, ManualClock, PolicyRegistry, RateLimiterRegistry,
};

fn limiter() -> (RateLimiterRegistry, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_now());
    let limiter = RateLimiterRegistry::builder().clock(clock.clone()).build();
    (limiter, clock)
}

#[test]
fn every_policy_denies_after_its_quota() {
    let (limiter, _clock) = limiter();

    for policy in PolicyRegistry::builtin().policies() {
        let key = format!("client-{}", policy.name());
        for i in 0..policy.max_requests() {
            assert!(
                limiter.check(policy.name(), &key).unwrap().is_allowed(),
                "{} request {} should pass",
                policy.name(),
                i
            );
        }
        assert!(
            !limiter.check(policy.name(), &key).unwrap().is_allowed(),
            "{} should deny beyond quota",
            policy.name()
        );
    }
}

#[test]
fn window_expiry_restores_quota() {
    let (limiter, clock) = limiter();

    for _ in 0..5 {
        limiter.check(PLATFORM_CONNECT, "1.2.3.4").unwrap();
    }
    assert!(!limiter.check(PLATFORM_CONNECT, "1.2.3.4").unwrap().is_allowed());

    clock.advance(Duration::from_secs(60 * 60));

    let decision = limiter.check(PLATFORM_CONNECT, "1.2.3.4").unwrap();
    assert!(decision.is_allowed());
    assert_eq!(decision.status().remaining, 4);
    assert_eq!(
        limiter.counter(PLATFORM_CONNECT, "1.2.3.4").unwrap().unwrap().count,
        1
    );
}

#[test]
fn distinct_keys_do_not_interfere() {
    let (limiter, _clock) = limiter();

    for _ in 0..5 {
        limiter.check(AUTH, "10.0.0.1").unwrap();
    }
    assert!(!limiter.check(AUTH, "10.0.0.1").unwrap().is_allowed());

    for _ in 0..5 {
        assert!(limiter.check(AUTH, "10.0.0.2").unwrap().is_allowed());
    }
}

#[test]
fn concurrent_checks_never_exceed_quota() {
    let limiter = RateLimiterRegistry::builder().build();
    let allowed = AtomicUsize::new(0);
    let denied = AtomicUsize::new(0);

    // ai-insights admits 10 per hour; fire 10 + 22 at once.
    std::thread::scope(|scope| {
        for _ in 0..32 {
            scope.spawn(|| match limiter.check(AI_INSIGHTS, "203.0.113.7").unwrap() {
                Decision::Allow(_) => allowed.fetch_add(1, Ordering::SeqCst),
                Decision::Deny(_) => denied.fetch_add(1, Ordering::SeqCst),
            });
        }
    });

    assert_eq!(allowed.load(Ordering::SeqCst), 10);
    assert_eq!(denied.load(Ordering::SeqCst), 22);
}

#[test]
fn auth_scenario() {
    let (limiter, clock) = limiter();
    let start = clock.now();

    for _ in 0..5 {
        assert!(limiter.check(AUTH, "1.2.3.4").unwrap().is_allowed());
    }

    match limiter.check(AUTH, "1.2.3.4").unwrap() {
        Decision::Deny(rejection) => {
            assert!(rejection.message.to_lowercase().contains("too many"));
            assert_eq!(rejection.retry_after, start + chrono::Duration::minutes(15));
            assert!(rejection.retry_after >= clock.now());

            let body = rejection.body();
            assert!(body["error"]
                .as_str()
                .unwrap()
                .to_lowercase()
                .contains("too many"));
            let retry_after: chrono::DateTime<chrono::Utc> =
                body["retryAfter"].as_str().unwrap().parse().unwrap();
            let drift = (retry_after - (start + chrono::Duration::minutes(15)))
                .num_milliseconds()
                .abs();
            assert!(drift < 1, "retryAfter drifted by {}ms", drift);
        }
        other => panic!("expected denial, got {:?}", other),
    }
}

#[test]
fn ai_insights_rejection_includes_upgrade_hint() {
    let (limiter, _clock) = limiter();

    for _ in 0..10 {
        limiter.check(AI_INSIGHTS, "user-42").unwrap();
    }

    let Decision::Deny(rejection) = limiter.check(AI_INSIGHTS, "user-42").unwrap() else {
        panic!("expected denial");
    };

    let expected = limiter.policies().get(AI_INSIGHTS).unwrap().extra().clone();
    let body = rejection.body();
    for (field, value) in &expected {
        assert_eq!(&body[field], value);
    }
    assert_eq!(body["upgradeUrl"], "/pricing");
}

#[test]
fn unknown_policy_is_a_configuration_error() {
    let (limiter, _clock) = limiter();

    for _ in 0..3 {
        let err = limiter.check("exports", "1.2.3.4").unwrap_err();
        assert!(err.is_configuration());
    }
    assert_eq!(limiter.tracked_keys(), 0);
}

#[test]
fn sweep_bounds_memory() {
    let (limiter, clock) = limiter();

    for i in 0..50 {
        limiter.check(GENERAL, &format!("198.51.100.{}", i)).unwrap();
    }
    clock.advance(Duration::from_secs(20 * 60));
    limiter.check(GENERAL, "192.0.2.1").unwrap();

    // 20 minutes in: nothing is two 15-minute windows old yet.
    assert_eq!(limiter.sweep(), 0);
    assert_eq!(limiter.tracked_keys(), 51);

    clock.advance(Duration::from_secs(10 * 60));
    assert_eq!(limiter.sweep(), 50);
    assert_eq!(limiter.tracked_keys(), 1);
    assert!(limiter.counter(GENERAL, "192.0.2.1").unwrap().is_some());
}

#[test]
fn runtime_policy_update_applies_to_next_check() {
    let (limiter, _clock) = limiter();

    for _ in 0..5 {
        limiter.check(AUTH, "1.2.3.4").unwrap();
    }
    assert!(!limiter.check(AUTH, "1.2.3.4").unwrap().is_allowed());

    let mut spec = limiter.policies().get(AUTH).unwrap().to_spec();
    spec.max_requests = 6;
    limiter.update_policy(creatorgate_rate_limit::Policy::from_spec(&spec).unwrap());

    let decision = limiter.check(AUTH, "1.2.3.4").unwrap();
    assert!(decision.is_allowed());
    assert_eq!(decision.status().limit, 6);
    assert_eq!(decision.status().remaining, 0);
}

#[test]
fn longest_allowed_window_checks_and_sweeps_without_overflow() {
    let mut config = creatorgate_common::RateLimitConfig::default();
    config.policies.insert(
        AUTH.to_string(),
        creatorgate_common::PolicyConfig {
            window_secs: Some(creatorgate_common::config::MAX_WINDOW_SECS),
            ..Default::default()
        },
    );
    let limiter = RateLimiterRegistry::new(&config).unwrap();

    for _ in 0..5 {
        assert!(limiter.check(AUTH, "1.2.3.4").unwrap().is_allowed());
    }
    assert!(!limiter.check(AUTH, "1.2.3.4").unwrap().is_allowed());
    assert_eq!(limiter.sweep(), 0);

    config.policies.get_mut(AUTH).unwrap().window_secs = Some(100_000_000_000_000);
    assert!(RateLimiterRegistry::new(&config).is_err());
}
