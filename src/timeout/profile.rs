//! Timeout profiles.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ratelimit::OperationClass;

/// A named operation class with its own deadline policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutProfile {
    #[default]
    Default,
    Query,
    LongQuery,
    Write,
    Admin,
    Connection,
}

impl TimeoutProfile {
    pub const ALL: [TimeoutProfile; 6] = [
        TimeoutProfile::Default,
        TimeoutProfile::Query,
        TimeoutProfile::LongQuery,
        TimeoutProfile::Write,
        TimeoutProfile::Admin,
        TimeoutProfile::Connection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutProfile::Default => "default",
            TimeoutProfile::Query => "query",
            TimeoutProfile::LongQuery => "long_query",
            TimeoutProfile::Write => "write",
            TimeoutProfile::Admin => "admin",
            TimeoutProfile::Connection => "connection",
        }
    }
}

impl From<OperationClass> for TimeoutProfile {
    fn from(class: OperationClass) -> Self {
        match class {
            OperationClass::Query => TimeoutProfile::Query,
            OperationClass::Write => TimeoutProfile::Write,
            OperationClass::Admin => TimeoutProfile::Admin,
        }
    }
}

impl fmt::Display for TimeoutProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
