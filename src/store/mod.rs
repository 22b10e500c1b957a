//! Stores: state containers driven by dispatched actions.
//!
//! A store owns a state bag, notifies change listeners whenever the state is
//! set, and routes namespaced actions to named methods according to a
//! declarative [`BindingSpec`].

mod bindings;
mod config;
mod store;

pub use bindings::{BindingSpec, MethodRef, WILDCARD};
pub use config::{StoreConfig, DEFAULT_STORE_NAME};
pub use store::{ListenerId, State, Store, WeakStore};
