pub mod config;
pub mod error;

pub use config::{
    AdminConfig, AppConfig, FailureMode, KeyStrategy, PolicyConfig, PolicySpec, RateLimitConfig,
    RouteConfig, ServerConfig,
};
pub use error::{GateError, GateResult};
