//! Shared identity types

mod ids;

pub use ids::{InitiatorId, NotificationId, RecipientId, RequestId, SessionId};
