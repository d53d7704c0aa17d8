use chrono::{DateTime, Duration, Utc};

/// Counter state for one `(policy, key)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterEntry {
    pub window_start: DateTime<Utc>,
    pub count: u64,
    /// Window length in effect when the entry was last touched. Kept on the
    /// entry so the sweep can age it without consulting the policy table.
    pub window: Duration,
}

/// The limits one admission attempt is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub max_requests: u64,
    pub window: Duration,
}

/// Outcome of a single admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub admitted: bool,
    /// Requests admitted in the window after this attempt.
    pub count: u64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

impl CounterEntry {
    pub fn new(now: DateTime<Utc>, window: Duration) -> Self {
        Self {
            window_start: now,
            count: 0,
            window,
        }
    }

    pub fn window_end(&self) -> DateTime<Utc> {
        saturating_add(self.window_start, self.window)
    }

    /// An entry is stale once its window ended more than one further window
    /// ago, i.e. it has been untouched for at least `2 * window`.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now >= saturating_add(self.window_end(), self.window)
    }
}

/// `at + by`, clamped to the latest representable instant.
pub fn saturating_add(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    at.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Apply one fixed-window admission attempt to `entry`.
///
/// The caller must hold exclusive access to the entry for the whole call;
/// the check and the increment form a single unit.
///
/// Fixed windows allow a burst of `max_requests` right at a window start and
/// another right after the boundary. That is accepted for coarse abuse guards.
pub fn admit(entry: &mut CounterEntry, quota: &Quota, now: DateTime<Utc>) -> WindowSnapshot {
    entry.window = quota.window;

    if now >= entry.window_end() {
        entry.window_start = now;
        entry.count = 0;
    }

    let admitted = entry.count < quota.max_requests;
    if admitted {
        entry.count += 1;
    }

    WindowSnapshot {
        admitted,
        count: entry.count,
        window_start: entry.window_start,
        window_end: entry.window_end(),
    }
}
