//! Action messages broadcast through the dispatcher.
//!
//! An action is a tagged message whose type is namespaced as
//! `"Prefix.ActionName"`. Stores bind prefixes and action names to their
//! methods; the dispatcher itself never looks inside an action.

mod action;

pub(crate) use action::SEPARATOR;
pub use action::{action_type, Action};
