//! Deadline enforcement for governed operations.

mod manager;
mod profile;
mod scope;

pub use manager::{DurationCheck, TimeoutDetails, TimeoutManager, NEAR_DEADLINE_THRESHOLD};
pub use profile::TimeoutProfile;
pub use scope::{DeadlineScope, ScopeError, ScopeRelease};
