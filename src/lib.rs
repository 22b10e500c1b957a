//! # flux-store
//!
//! Stores and a dispatcher for unidirectional data flow.
//!
//! Actions travel one way: callers dispatch an [`Action`] through a shared
//! [`Dispatcher`], stores route it to the methods bound to its type, methods
//! update state with [`Store::set_state`], and every change listener of the
//! store is notified.
//!
//! ## Dispatcher
//!
//! - `Dispatcher` - Synchronous broadcast to registered handlers
//! - `wait_for` - Ordering between handlers of the same dispatch
//!
//! ## Store
//!
//! - `Store` - State bag with change listeners
//! - `BindingSpec` - Declarative `{Prefix: {action: method}}` routing
//! - `StoreConfig` - Name and initial state, deserializable with serde

pub mod action;
pub mod dispatcher;
pub mod error;
pub mod store;

// Re-export main types for convenience
pub use action::Action;
pub use dispatcher::{DispatchToken, Dispatcher};
pub use error::{FluxError, Result};
pub use store::{BindingSpec, ListenerId, MethodRef, State, Store, StoreConfig, WeakStore};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn it_works() {
        // Basic smoke test
        let dispatcher = Dispatcher::new();
        let store = Store::new(dispatcher.clone());
        store.define_method("set", |store, payload| {
            store.set_state([("value", payload.clone())]);
        });
        store
            .bind_actions(&BindingSpec::new().auto("Smoke", ["set"]))
            .unwrap();

        dispatcher.dispatch(Action::new("Smoke.set", json!(42))).unwrap();
        assert_eq!(store.get("value"), Some(json!(42)));
    }
}
