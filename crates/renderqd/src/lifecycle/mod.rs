//! Shutdown coordination shared by the listener, admission and workers.
//!
//! A [`ShutdownToken`] is cloned into every long-running loop, and the
//! [`ConnectionRegistry`] tracks client sockets that are still owed a reply so
//! a shutdown can tell each of them why the connection is going away.

mod controller;
mod registry;
mod token;

pub(crate) use self::controller::LifecycleController;
pub(crate) use self::registry::{
    ConnectionId, ConnectionRegistry, RegistrationError, notify_and_close,
};
pub use self::token::ShutdownToken;

const LIFECYCLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lifecycle");
