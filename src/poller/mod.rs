//! Dashboard polling.
//!
//! Provides:
//! - Half-hour mark arithmetic and the startup fetch decision
//! - The poll scheduler with its in-flight latch and cancellation

pub mod marks;
pub mod scheduler;

pub use marks::{
    decide_startup, most_recent_half_hour_mark, next_half_hour_mark, Clock, StartupDecision,
    SystemClock,
};
pub use scheduler::{PollState, Poller, PollerConfig, PollerHandle, RetryPolicy, Trigger};
