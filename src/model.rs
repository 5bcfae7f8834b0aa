//! Core data model.
//!
//! Tasks and workers belong to the surrounding marketplace; the engine only
//! reads them. Applications, buckets, and timers are the engine's own
//! records, all addressed by task id.

/// Declares a `Uuid` newtype with the conversions every id needs.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub uuid::Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::error::Error;

            fn from_str(s: &str) -> crate::error::Result<Self> {
                uuid::Uuid::parse_str(s).map(Self).map_err(|e| {
                    crate::error::Error::Other(format!(
                        "invalid {}: {s}: {e}",
                        stringify!($name)
                    ))
                })
            }
        }
    };
}

pub(crate) use uuid_id;

pub mod application;
pub mod task;
pub mod timer;

pub use application::*;
pub use task::*;
pub use timer::*;
