use crate::action::Action;
use crate::error::{FluxError, Result};
use std::collections::HashSet;
use std::fmt;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, trace, warn};

type Handler = Arc<dyn Fn(&Action) + Send + Sync>;

/// Identifies a handler registered with a [`Dispatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DispatchToken(usize);

impl fmt::Display for DispatchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID_{}", self.0)
    }
}

/// Bookkeeping for the dispatch currently in progress.
#[derive(Default)]
struct DispatchCycle {
    action: Option<Arc<Action>>,
    // Handlers that have started for the current action
    pending: HashSet<DispatchToken>,
    // Handlers that have returned for the current action
    handled: HashSet<DispatchToken>,
}

struct DispatcherInner {
    next_id: AtomicUsize,
    handlers: RwLock<Vec<(DispatchToken, Handler)>>,
    cycle: Mutex<DispatchCycle>,
}

/// Broadcasts actions to every registered handler.
///
/// Cloning a dispatcher yields another handle to the same registry, which is
/// how several stores share one dispatcher.
///
/// # Examples
///
/// ```
/// use flux_store::{Action, Dispatcher};
/// use serde_json::Value;
/// use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
///
/// let dispatcher = Dispatcher::new();
/// let seen = Arc::new(AtomicUsize::new(0));
/// let seen_clone = seen.clone();
///
/// dispatcher.register(move |_action| {
///     seen_clone.fetch_add(1, Ordering::SeqCst);
/// });
///
/// dispatcher.dispatch(Action::new("Todo.add", Value::Null)).unwrap();
/// assert_eq!(seen.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    /// Create a dispatcher with no handlers.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                next_id: AtomicUsize::new(0),
                handlers: RwLock::new(Vec::new()),
                cycle: Mutex::new(DispatchCycle::default()),
            }),
        }
    }

    /// Register a handler to be invoked with every dispatched action.
    pub fn register<F>(&self, handler: F) -> DispatchToken
    where
        F: Fn(&Action) + Send + Sync + 'static,
    {
        let token = DispatchToken(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((token, Arc::new(handler)));
        debug!(%token, "registered dispatch handler");
        token
    }

    /// Remove a handler.
    ///
    /// The handler is dropped after the registry lock is released, so a
    /// handler owning the last handle to a store may unregister the store's
    /// own handlers from its destructor.
    pub fn unregister(&self, token: DispatchToken) -> Result<()> {
        let removed = {
            let mut handlers = self
                .inner
                .handlers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let index = handlers
                .iter()
                .position(|(registered, _)| *registered == token)
                .ok_or(FluxError::UnknownToken(token))?;
            handlers.remove(index)
        };
        drop(removed);
        debug!(%token, "unregistered dispatch handler");
        Ok(())
    }

    /// Dispatch an action to every registered handler.
    ///
    /// Handlers run synchronously in registration order. Handlers registered
    /// while the dispatch runs do not see the current action. A panic in a
    /// handler is propagated once the dispatcher has been reset.
    pub fn dispatch(&self, action: Action) -> Result<()> {
        let action = Arc::new(action);
        {
            let mut cycle = self.cycle();
            if let Some(current) = &cycle.action {
                warn!(
                    rejected = %action.action_type,
                    current = %current.action_type,
                    "dispatch attempted during another dispatch"
                );
                return Err(FluxError::AlreadyDispatching {
                    action_type: action.action_type.clone(),
                });
            }
            cycle.action = Some(Arc::clone(&action));
            cycle.pending.clear();
            cycle.handled.clear();
        }

        let tokens: Vec<DispatchToken> = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(token, _)| *token)
            .collect();
        trace!(action_type = %action.action_type, handlers = tokens.len(), "dispatching action");

        let result = catch_unwind(AssertUnwindSafe(|| {
            for token in tokens {
                if self.cycle().pending.contains(&token) {
                    continue;
                }
                // Skip handlers unregistered by an earlier handler
                let Some(handler) = self.handler(token) else {
                    continue;
                };
                self.invoke(token, &handler, &action);
            }
        }));

        *self.cycle() = DispatchCycle::default();

        match result {
            Ok(()) => Ok(()),
            Err(panic) => resume_unwind(panic),
        }
    }

    /// Run the handlers for `tokens` before continuing the current handler.
    ///
    /// Each handler still runs at most once per dispatch; tokens whose
    /// handler already finished are skipped.
    pub fn wait_for(&self, tokens: &[DispatchToken]) -> Result<()> {
        for &token in tokens {
            let action = {
                let cycle = self.cycle();
                let action = cycle.action.clone().ok_or(FluxError::NotDispatching)?;
                if cycle.pending.contains(&token) {
                    if cycle.handled.contains(&token) {
                        continue;
                    }
                    return Err(FluxError::CircularDependency(token));
                }
                action
            };
            let handler = self.handler(token).ok_or(FluxError::UnknownToken(token))?;
            trace!(%token, "waiting for handler");
            self.invoke(token, &handler, &action);
        }
        Ok(())
    }

    /// Whether a dispatch is currently running.
    pub fn is_dispatching(&self) -> bool {
        self.cycle().action.is_some()
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn handler(&self, token: DispatchToken) -> Option<Handler> {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(registered, _)| *registered == token)
            .map(|(_, handler)| Arc::clone(handler))
    }

    fn invoke(&self, token: DispatchToken, handler: &Handler, action: &Action) {
        self.cycle().pending.insert(token);
        handler(action);
        self.cycle().handled.insert(token);
    }

    fn cycle(&self) -> MutexGuard<'_, DispatchCycle> {
        self.inner
            .cycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handlers", &self.handler_count())
            .field("dispatching", &self.is_dispatching())
            .finish()
    }
}
