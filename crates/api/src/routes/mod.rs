pub mod counters;
pub mod health;
pub mod metrics;
pub mod policies;
pub mod stats;
