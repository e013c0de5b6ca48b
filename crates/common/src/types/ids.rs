//! Identity newtypes used across the verification subsystem
//!
//! All identifiers are opaque strings on the wire. `RequestId` and
//! `NotificationId` are generated server-side (UUID v4); the rest are
//! assigned by the surrounding HR platform and treated as opaque here.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! opaque_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

opaque_id!(
    /// Identifier of one verification request, unique for its lifetime
    RequestId
);

opaque_id!(
    /// Identifier of the live session being verified
    SessionId
);

opaque_id!(
    /// Identity of a party required to verify (e.g. a student)
    RecipientId
);

opaque_id!(
    /// Identity of the party that created a request (e.g. a lecturer)
    InitiatorId
);

opaque_id!(
    /// Dispatch identifier returned by the notification channel
    NotificationId
);

impl RequestId {
    /// Generate a fresh request id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl NotificationId {
    /// Generate a fresh dispatch id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}
