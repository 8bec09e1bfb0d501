//! Strongly-typed identifiers.
//!
//! Call and runner instances get UUID identities so log lines, metrics,
//! and status snapshots can be correlated across restarts.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to define a strongly-typed UUID v4 ID newtype wrapper.
///
/// Generates: struct, `new()`, `from_string()`, `as_str()`, Display,
/// Default, Serialize, Deserialize.
macro_rules! define_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn from_string(s: String) -> Result<Self, &'static str> {
                if s.is_empty() {
                    return Err(concat!(stringify!($name), " cannot be empty"));
                }
                Ok(Self(s))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(CallId);
define_id!(RunnerId);
