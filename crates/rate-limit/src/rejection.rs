use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Quota state reported to clients on every response, allowed or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub policy: String,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
    pub window_secs: u64,
}

impl RateLimitStatus {
    /// Whole seconds until the window resets, rounded up so clients never
    /// retry early. Never negative.
    pub fn reset_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_at - now).num_milliseconds();
        if millis <= 0 {
            0
        } else {
            (millis as u64).div_ceil(1000)
        }
    }
}

/// A denied admission, carrying everything needed to build the 429 response.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub message: String,
    /// End of the window that is currently exhausted.
    pub retry_after: DateTime<Utc>,
    pub extra: Map<String, Value>,
    pub status: RateLimitStatus,
}

#[derive(Serialize)]
struct RejectionBody<'a> {
    error: &'a str,
    #[serde(rename = "retryAfter")]
    retry_after: String,
    #[serde(flatten)]
    extra: &'a Map<String, Value>,
}

impl Rejection {
    /// HTTP status for every rejection.
    pub const STATUS_CODE: u16 = 429;

    /// JSON body: `{"error", "retryAfter", ...extra}`.
    ///
    /// `retryAfter` is RFC 3339 in UTC with millisecond precision, e.g.
    /// `2026-10-18T12:15:00.000Z`.
    pub fn body(&self) -> Value {
        let body = RejectionBody {
            error: &self.message,
            retry_after: format_timestamp(self.retry_after),
            extra: &self.extra,
        };
        serde_json::to_value(body).unwrap_or_else(|_| {
            serde_json::json!({
                "error": self.message,
                "retryAfter": format_timestamp(self.retry_after),
            })
        })
    }
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
