use super::bindings::BindingSpec;
use super::config::StoreConfig;
use crate::dispatcher::{DispatchToken, Dispatcher};
use crate::error::Result;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tracing::{debug, trace};

/// The state bag of a store.
pub type State = Map<String, Value>;

type Listener = Arc<dyn Fn() + Send + Sync>;
type Method = Arc<dyn Fn(&Store, &Value) + Send + Sync>;

/// Identifies a change listener so it can be removed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(usize);

struct StoreInner {
    name: String,
    change_event: String,
    // Copy-on-write so readers never hold the lock while user code runs
    state: RwLock<Arc<State>>,
    // Event name to listeners; an entry exists only while it is non-empty
    listeners: RwLock<HashMap<String, Vec<(ListenerId, Listener)>>>,
    methods: RwLock<HashMap<String, Method>>,
    dispatcher: Dispatcher,
    tokens: Mutex<Vec<DispatchToken>>,
    next_listener_id: AtomicUsize,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let tokens = std::mem::take(
            self.tokens
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for token in tokens {
            if let Err(err) = self.dispatcher.unregister(token) {
                debug!(store = %self.name, %err, "handler already removed");
            }
        }
    }
}

/// A store of application state that reacts to dispatched actions.
///
/// Cloning a store yields another handle to the same state, listeners and
/// bindings. The dispatcher only holds a weak reference, so dropping the last
/// handle unregisters the store's action handlers.
///
/// # Examples
///
/// ```
/// use flux_store::{Action, BindingSpec, Dispatcher, Store};
/// use serde_json::json;
///
/// let dispatcher = Dispatcher::new();
/// let store = Store::new(dispatcher.clone());
///
/// store.define_method("rename", |store, payload| {
///     store.set_state([("name", payload.clone())]);
/// });
/// store
///     .bind_actions(&BindingSpec::new().bind("User", "rename", "rename"))
///     .unwrap();
///
/// dispatcher.dispatch(Action::new("User.rename", json!("John"))).unwrap();
/// assert_eq!(store.get("name"), Some(json!("John")));
/// ```
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

/// A handle that does not keep its [`Store`] alive.
///
/// Listeners that need to read their own store should capture one of these
/// rather than a `Store` clone.
#[derive(Clone)]
pub struct WeakStore {
    inner: Weak<StoreInner>,
}

impl WeakStore {
    /// The store, if it is still alive.
    pub fn upgrade(&self) -> Option<Store> {
        self.inner.upgrade().map(|inner| Store { inner })
    }
}

impl Store {
    /// Create a store named `"Store"` with an empty state.
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self::with_config(StoreConfig::default(), dispatcher)
    }

    /// Create a store from explicit settings.
    pub fn with_config(config: StoreConfig, dispatcher: Dispatcher) -> Self {
        let change_event = config.change_event_name();
        Self {
            inner: Arc::new(StoreInner {
                name: config.name,
                change_event,
                state: RwLock::new(Arc::new(config.initial_state)),
                listeners: RwLock::new(HashMap::new()),
                methods: RwLock::new(HashMap::new()),
                dispatcher,
                tokens: Mutex::new(Vec::new()),
                next_listener_id: AtomicUsize::new(0),
            }),
        }
    }

    /// The configured store name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Create a handle that does not keep this store alive.
    pub fn downgrade(&self) -> WeakStore {
        WeakStore {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// The dispatcher this store's actions are bound through.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Get a snapshot of the current state.
    pub fn get_state(&self) -> State {
        State::clone(&self.snapshot())
    }

    /// Get a single value from the state.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.read(|state| state.get(key).cloned())
    }

    /// Read state without cloning it.
    ///
    /// `f` sees the state as it was when `read` was called. It may write to
    /// the store; those writes are not visible through its argument.
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&State) -> R,
    {
        f(&self.snapshot())
    }

    fn snapshot(&self) -> Arc<State> {
        Arc::clone(
            &self
                .inner
                .state
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Merge `partial` into the state, then emit the change event.
    ///
    /// Existing keys are overwritten and other keys are left alone. The
    /// change event is emitted even if no value actually changed.
    pub fn set_state<I, K>(&self, partial: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        {
            let mut guard = self
                .inner
                .state
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let state = Arc::make_mut(&mut guard);
            for (key, value) in partial {
                state.insert(key.into(), value);
            }
        }
        self.emit_change();
    }

    /// Subscribe to the change event.
    ///
    /// Adding the same callback twice registers two independent listeners.
    pub fn add_change_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst));
        self.inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(self.inner.change_event.clone())
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Unsubscribe a listener. Unknown ids are ignored.
    pub fn remove_change_listener(&self, id: ListenerId) {
        let event = &self.inner.change_event;
        let mut listeners = self
            .inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(registered) = listeners.get_mut(event) {
            registered.retain(|(listener, _)| *listener != id);
            if registered.is_empty() {
                listeners.remove(event);
            }
        }
    }

    /// Whether anything is subscribed to the change event.
    pub fn has_listeners(&self) -> bool {
        self.inner
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&self.inner.change_event)
    }

    /// Number of change listeners.
    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&self.inner.change_event)
            .map_or(0, Vec::len)
    }

    /// Invoke every change listener in subscription order.
    pub fn emit_change(&self) {
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&self.inner.change_event)
            .map(|registered| registered.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        trace!(event = %self.inner.change_event, listeners = listeners.len(), "emitting change");
        for listener in listeners {
            listener();
        }
    }

    /// The name of the change event, `"<name> change"`.
    pub fn change_event_name(&self) -> &str {
        &self.inner.change_event
    }

    /// Define a method that actions can be bound to.
    ///
    /// The method receives the store and the action payload. It should use
    /// the store argument rather than capture a clone of the store, which
    /// would keep the store alive forever.
    pub fn define_method<F>(&self, name: impl Into<String>, method: F)
    where
        F: Fn(&Store, &Value) + Send + Sync + 'static,
    {
        self.inner
            .methods
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::new(method));
    }

    /// Whether a method with this name is defined.
    pub fn has_method(&self, name: &str) -> bool {
        self.inner
            .methods
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Route dispatched actions to this store's methods.
    ///
    /// Method names are resolved now: an undefined name fails the whole call
    /// and nothing is registered. Later redefinitions of a method do not
    /// affect routes that are already bound. Each call registers one handler
    /// with the dispatcher; actions without a route are ignored.
    pub fn bind_actions(&self, spec: &BindingSpec) -> Result<DispatchToken> {
        let routes = {
            let methods = self
                .inner
                .methods
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            spec.resolve(|name| methods.get(name).cloned())?
        };
        let route_count = routes.len();

        let store = self.downgrade();
        let token = self.inner.dispatcher.register(move |action| {
            let Some(methods) = routes.get(&action.action_type) else {
                return;
            };
            let Some(store) = store.upgrade() else {
                return;
            };
            trace!(
                store = %store.name(),
                action_type = %action.action_type,
                methods = methods.len(),
                "routing action"
            );
            for method in methods {
                method(&store, &action.payload);
            }
        });

        self.inner
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(token);
        debug!(store = %self.name(), %token, routes = route_count, "bound actions");
        Ok(token)
    }

    /// Parse a binding spec from JSON and bind it.
    pub fn bind_actions_json(&self, json: &str) -> Result<DispatchToken> {
        self.bind_actions(&BindingSpec::from_json(json)?)
    }

    /// Tokens of every handler this store registered, for use with
    /// [`Dispatcher::wait_for`].
    pub fn dispatch_tokens(&self) -> Vec<DispatchToken> {
        self.inner
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove every handler this store registered.
    pub fn unbind_actions(&self) {
        let tokens = std::mem::take(
            &mut *self
                .inner
                .tokens
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for token in tokens {
            if let Err(err) = self.inner.dispatcher.unregister(token) {
                debug!(store = %self.name(), %err, "handler already removed");
            }
        }
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.inner.name)
            .field("state", &self.get_state())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::error::FluxError;
    use serde_json::json;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        (count, move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn store_get_set() {
        let store = Store::new(Dispatcher::new());
        assert!(store.get_state().is_empty());

        store.set_state([("name", json!("John"))]);
        assert_eq!(store.get_state()["name"], json!("John"));
    }

    #[test]
    fn set_state_merges_shallowly() {
        let store = Store::new(Dispatcher::new());
        store.set_state([("name", json!("John")), ("age", json!(30))]);
        store.set_state([("age", json!(31)), ("tags", json!({ "a": 1 }))]);
        store.set_state([("tags", json!({ "b": 2 }))]);

        assert_eq!(
            Value::Object(store.get_state()),
            json!({ "name": "John", "age": 31, "tags": { "b": 2 } })
        );
    }

    #[test]
    fn set_state_accepts_state_maps() {
        let store = Store::new(Dispatcher::new());
        let mut partial = State::new();
        partial.insert("count".to_string(), json!(3));
        store.set_state(partial);
        assert_eq!(store.get("count"), Some(json!(3)));
    }

    #[test]
    fn store_subscribe() {
        let store = Store::new(Dispatcher::new());
        let (calls, listener) = counter();
        store.add_change_listener(listener);

        assert_eq!(calls.load(Ordering::SeqCst), 0);

        store.set_state([("count", json!(1))]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Same value, still notifies
        store.set_state([("count", json!(1))]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn emit_change_calls_listeners_in_order() {
        let store = Store::new(Dispatcher::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        for label in ["first", "second", "third"] {
            let order = order.clone();
            store.add_change_listener(move || order.lock().unwrap().push(label));
        }

        store.emit_change();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn emit_change_without_listeners() {
        let store = Store::new(Dispatcher::new());
        store.emit_change();
        assert!(!store.has_listeners());
    }

    #[test]
    fn duplicate_listeners_are_independent() {
        let store = Store::new(Dispatcher::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let callback = {
            let calls = calls.clone();
            Arc::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };

        let first = store.add_change_listener({
            let callback = callback.clone();
            move || callback()
        });
        store.add_change_listener(move || callback());

        store.emit_change();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        store.remove_change_listener(first);
        store.emit_change();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.listener_count(), 1);
    }

    #[test]
    fn removing_last_listener_clears_entry() {
        let store = Store::new(Dispatcher::new());
        let (_, listener) = counter();
        let id = store.add_change_listener(listener);
        assert!(store.has_listeners());

        store.remove_change_listener(id);
        assert!(!store.has_listeners());
        assert!(!store
            .inner
            .listeners
            .read()
            .unwrap()
            .contains_key("Store change"));
    }

    #[test]
    fn removing_unknown_listener_is_noop() {
        let store = Store::new(Dispatcher::new());
        store.remove_change_listener(ListenerId(42));

        let (_, listener) = counter();
        store.add_change_listener(listener);
        store.remove_change_listener(ListenerId(42));
        assert_eq!(store.listener_count(), 1);
    }

    #[test]
    fn listeners_can_read_state_and_unsubscribe() {
        let store = Store::new(Dispatcher::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let own_id = Arc::new(Mutex::new(None));

        let id = {
            let handle = store.downgrade();
            let seen = seen.clone();
            let own_id = own_id.clone();
            store.add_change_listener(move || {
                let Some(handle) = handle.upgrade() else {
                    return;
                };
                seen.lock().unwrap().push(handle.get("n"));
                if let Some(id) = *own_id.lock().unwrap() {
                    handle.remove_change_listener(id);
                }
            })
        };
        *own_id.lock().unwrap() = Some(id);

        store.set_state([("n", json!(1))]);
        store.set_state([("n", json!(2))]);
        assert_eq!(*seen.lock().unwrap(), vec![Some(json!(1))]);
        assert!(!store.has_listeners());
    }

    #[test]
    fn change_event_name_uses_store_name() {
        assert_eq!(
            Store::new(Dispatcher::new()).change_event_name(),
            "Store change"
        );
        let todo = Store::with_config(StoreConfig::named("Todo"), Dispatcher::new());
        assert_eq!(todo.change_event_name(), "Todo change");
        assert_eq!(todo.name(), "Todo");
    }

    #[test]
    fn with_config_seeds_state() {
        let mut initial = State::new();
        initial.insert("filter".to_string(), json!("all"));
        let store = Store::with_config(
            StoreConfig::named("Todo").with_initial_state(initial),
            Dispatcher::new(),
        );
        assert_eq!(store.get("filter"), Some(json!("all")));
    }

    #[test]
    fn bound_method_receives_payload() {
        let dispatcher = Dispatcher::new();
        let store = Store::new(dispatcher.clone());
        let payloads = Arc::new(Mutex::new(Vec::new()));
        {
            let payloads = payloads.clone();
            store.define_method("callback", move |_, payload| {
                payloads.lock().unwrap().push(payload.clone());
            });
        }

        store
            .bind_actions(&BindingSpec::new().bind("MyActions", "custom", "callback"))
            .unwrap();
        dispatcher
            .dispatch(Action::new("MyActions.custom", json!({ "a": 1 })))
            .unwrap();

        assert_eq!(*payloads.lock().unwrap(), vec![json!({ "a": 1 })]);
    }

    #[test]
    fn bound_method_updates_state_and_notifies() {
        let dispatcher = Dispatcher::new();
        let store = Store::new(dispatcher.clone());
        store.define_method("increment", |store, payload| {
            let by = payload.as_i64().unwrap_or(1);
            let current = store.get("count").and_then(|v| v.as_i64()).unwrap_or(0);
            store.set_state([("count", json!(current + by))]);
        });
        store
            .bind_actions_json(r#"{ "Counter": { "*": ["increment"] } }"#)
            .unwrap();
        let (calls, listener) = counter();
        store.add_change_listener(listener);

        dispatcher
            .dispatch(Action::new("Counter.increment", json!(5)))
            .unwrap();
        dispatcher
            .dispatch(Action::new("Counter.increment", Value::Null))
            .unwrap();

        assert_eq!(store.get("count"), Some(json!(6)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn action_bound_to_several_methods_runs_them_in_order() {
        let dispatcher = Dispatcher::new();
        let store = Store::new(dispatcher.clone());
        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["validate", "save"] {
            let order = order.clone();
            store.define_method(name, move |_, _| order.lock().unwrap().push(name));
        }

        store
            .bind_actions(&BindingSpec::new().bind("Form", "submit", vec!["validate", "save"]))
            .unwrap();
        dispatcher
            .dispatch(Action::new("Form.submit", Value::Null))
            .unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["validate", "save"]);
    }

    #[test]
    fn unknown_method_fails_at_bind_time() {
        let dispatcher = Dispatcher::new();
        let store = Store::new(dispatcher.clone());
        store.define_method("callback", |_, _| {});
        assert!(store.has_method("callback"));
        assert!(!store.has_method("missing"));

        let spec = BindingSpec::new()
            .bind("MyActions", "custom", "callback")
            .bind("MyActions", "other", "missing");
        let err = store.bind_actions(&spec).unwrap_err();

        assert!(matches!(err, FluxError::UnknownMethod { method, .. } if method == "missing"));
        assert_eq!(dispatcher.handler_count(), 0);
        assert!(store.dispatch_tokens().is_empty());
    }

    #[test]
    fn one_handler_per_bind_call() {
        let dispatcher = Dispatcher::new();
        let store = Store::new(dispatcher.clone());
        store.define_method("callback", |_, _| {});

        let first = store
            .bind_actions(&BindingSpec::new().bind("A", "x", "callback"))
            .unwrap();
        let second = store
            .bind_actions(&BindingSpec::new().auto("B", ["callback"]))
            .unwrap();

        assert_eq!(dispatcher.handler_count(), 2);
        assert_eq!(store.dispatch_tokens(), vec![first, second]);
    }

    #[test]
    fn unbind_actions_stops_routing() {
        let dispatcher = Dispatcher::new();
        let store = Store::new(dispatcher.clone());
        let (calls, callback) = counter();
        store.define_method("callback", move |_, _| callback());
        store
            .bind_actions(&BindingSpec::new().bind("MyActions", "custom", "callback"))
            .unwrap();

        store.unbind_actions();
        dispatcher
            .dispatch(Action::new("MyActions.custom", Value::Null))
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.handler_count(), 0);
        assert!(store.dispatch_tokens().is_empty());
    }

    #[test]
    fn dropping_store_unregisters_handlers() {
        let dispatcher = Dispatcher::new();
        {
            let store = Store::new(dispatcher.clone());
            store.define_method("callback", |_, _| {});
            store
                .bind_actions(&BindingSpec::new().bind("MyActions", "custom", "callback"))
                .unwrap();
            assert_eq!(dispatcher.handler_count(), 1);
        }
        assert_eq!(dispatcher.handler_count(), 0);
        dispatcher
            .dispatch(Action::new("MyActions.custom", Value::Null))
            .unwrap();
    }

    #[test]
    fn stores_can_wait_for_each_other() {
        let dispatcher = Dispatcher::new();
        let session = Store::with_config(StoreConfig::named("Session"), dispatcher.clone());
        let profile = Store::with_config(StoreConfig::named("Profile"), dispatcher.clone());

        // Profile binds first but depends on Session having handled the login
        let session_tokens = Arc::new(Mutex::new(Vec::new()));
        {
            let session_tokens = session_tokens.clone();
            profile.define_method("login", move |store, _| {
                let tokens = session_tokens.lock().unwrap().clone();
                store.dispatcher().wait_for(&tokens).unwrap();
                store.set_state([("ready", json!(true))]);
            });
        }
        profile
            .bind_actions(&BindingSpec::new().auto("User", ["login"]))
            .unwrap();

        session.define_method("login", |store, payload| {
            store.set_state([("user", payload.clone())]);
        });
        session
            .bind_actions(&BindingSpec::new().auto("User", ["login"]))
            .unwrap();
        *session_tokens.lock().unwrap() = session.dispatch_tokens();

        let order = Arc::new(Mutex::new(Vec::new()));
        for store in [&session, &profile] {
            let order = order.clone();
            let name = store.name().to_string();
            store.add_change_listener(move || order.lock().unwrap().push(name.clone()));
        }

        dispatcher
            .dispatch(Action::new("User.login", json!("ada")))
            .unwrap();

        assert_eq!(session.get("user"), Some(json!("ada")));
        assert_eq!(profile.get("ready"), Some(json!(true)));
        assert_eq!(
            *order.lock().unwrap(),
            vec!["Session".to_string(), "Profile".to_string()]
        );
    }

    #[test]
    fn read_closure_may_write_to_store() {
        let store = Store::new(Dispatcher::new());
        store.set_state([("n", json!(1))]);

        let seen = store.read(|state| {
            store.set_state([("n", json!(state.len() + 1))]);
            state.get("n").cloned()
        });

        assert_eq!(seen, Some(json!(1)));
        assert_eq!(store.get("n"), Some(json!(2)));
    }

    #[test]
    fn unregistering_handler_that_owns_last_store_handle() {
        let dispatcher = Dispatcher::new();
        let store = Store::new(dispatcher.clone());
        store.define_method("ping", |_, _| {});
        store
            .bind_actions(&BindingSpec::new().auto("A", ["ping"]))
            .unwrap();

        let held = store.clone();
        let view = dispatcher.register(move |_| {
            let _ = held.get("x");
        });
        drop(store);
        assert_eq!(dispatcher.handler_count(), 2);

        // Run on a worker so a lock cycle fails the test instead of hanging it
        let (done_tx, done_rx) = mpsc::channel();
        let worker = dispatcher.clone();
        thread::spawn(move || {
            let _ = done_tx.send(worker.unregister(view).is_ok());
        });

        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)), Ok(true));
        assert_eq!(dispatcher.handler_count(), 0);
    }

    #[test]
    fn weak_handle_does_not_keep_store_alive() {
        let store = Store::new(Dispatcher::new());
        let weak = store.downgrade();
        assert!(weak.upgrade().is_some());

        drop(store);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn clones_share_state() {
        let store = Store::new(Dispatcher::new());
        let other = store.clone();
        other.set_state([("shared", json!(true))]);
        assert_eq!(store.get("shared"), Some(json!(true)));
    }
}
