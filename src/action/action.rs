use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Separator between the prefix and the action name.
pub(crate) const SEPARATOR: char = '.';

/// A message broadcast through a [`Dispatcher`](crate::Dispatcher).
///
/// Serializes as `{"actionType": "Prefix.Name", "payload": ...}`.
///
/// # Examples
///
/// ```
/// use flux_store::Action;
/// use serde_json::json;
///
/// let action = Action::new("Todo.add", json!({ "title": "Learn Rust" }));
/// assert_eq!(action.prefix(), Some("Todo"));
/// assert_eq!(action.name(), Some("add"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub action_type: String,
    #[serde(default)]
    pub payload: Value,
}

impl Action {
    /// Create a new action.
    pub fn new(action_type: impl Into<String>, payload: Value) -> Self {
        Self {
            action_type: action_type.into(),
            payload,
        }
    }

    /// The part of the action type before the first `.`.
    pub fn prefix(&self) -> Option<&str> {
        self.split().map(|(prefix, _)| prefix)
    }

    /// The part of the action type after the first `.`.
    pub fn name(&self) -> Option<&str> {
        self.split().map(|(_, name)| name)
    }

    fn split(&self) -> Option<(&str, &str)> {
        self.action_type.split_once(SEPARATOR)
    }
}

/// Build a namespaced action type.
pub fn action_type(prefix: &str, name: &str) -> String {
    format!("{prefix}{SEPARATOR}{name}")
}
