//! Synchronous action dispatch.
//!
//! The dispatcher is the single broadcast point of the data flow: every
//! registered handler receives every action, in registration order, on the
//! caller's stack. Handlers may order themselves against each other with
//! [`Dispatcher::wait_for`].

mod dispatcher;

pub use dispatcher::{DispatchToken, Dispatcher};
