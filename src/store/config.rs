use super::store::State;
use serde::{Deserialize, Serialize};

/// Name used by stores that are not given one.
pub const DEFAULT_STORE_NAME: &str = "Store";

/// Construction-time settings for a [`Store`](super::Store).
///
/// Every field has a default, so a partial document is enough:
///
/// ```
/// use flux_store::StoreConfig;
///
/// let config: StoreConfig = serde_json::from_str(r#"{ "name": "Todo" }"#).unwrap();
/// assert_eq!(config.change_event_name(), "Todo change");
/// assert!(config.initial_state.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreConfig {
    /// Identifies the store in its change event name and in logs.
    pub name: String,
    pub initial_state: State,
}

impl StoreConfig {
    /// Default settings under another name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Replace the initial state.
    pub fn with_initial_state(mut self, state: State) -> Self {
        self.initial_state = state;
        self
    }

    /// The change event name a store built from this config exposes.
    pub fn change_event_name(&self) -> String {
        format!("{} change", self.name)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_STORE_NAME.to_string(),
            initial_state: State::new(),
        }
    }
}
