//! Alert delivery.
//!
//! This module contains:
//! - The unlock-gated notification dispatcher
//! - The outbound sink trait and a logging sink
//! - Disguise phrases and email composition

pub mod disguise;
pub mod dispatcher;
pub mod email;
pub mod sink;

pub use dispatcher::{
    LockStatus, Notification, NotificationDispatcher, PendingNotification, SharedLockFlag,
};
pub use sink::{Alert, DispatchError, DispatchSink, LogSink, OutboundEmail, Priority};
