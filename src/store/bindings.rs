use crate::action::{action_type, SEPARATOR};
use crate::error::{FluxError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Action name that binds every listed method to the action of the same name.
pub const WILDCARD: &str = "*";

/// One or more method names an action is bound to.
///
/// Deserializes from either a string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MethodRef {
    One(String),
    Many(Vec<String>),
}

impl MethodRef {
    /// The method names, in invocation order.
    pub fn names(&self) -> &[String] {
        match self {
            MethodRef::One(name) => std::slice::from_ref(name),
            MethodRef::Many(names) => names,
        }
    }
}

impl From<&str> for MethodRef {
    fn from(name: &str) -> Self {
        MethodRef::One(name.to_string())
    }
}

impl From<String> for MethodRef {
    fn from(name: String) -> Self {
        MethodRef::One(name)
    }
}

impl<S: Into<String>> From<Vec<S>> for MethodRef {
    fn from(names: Vec<S>) -> Self {
        MethodRef::Many(names.into_iter().map(Into::into).collect())
    }
}

/// Declarative mapping from namespaced actions to store methods.
///
/// The shape is `{Prefix: {actionName: method | [methods], "*": [methods]}}`.
///
/// # Examples
///
/// ```
/// use flux_store::BindingSpec;
///
/// let built = BindingSpec::new()
///     .bind("MyActions", "custom", "callback")
///     .auto("MyActions", ["reset"]);
///
/// let parsed = BindingSpec::from_json(
///     r#"{ "MyActions": { "custom": "callback", "*": ["reset"] } }"#,
/// )
/// .unwrap();
///
/// assert_eq!(built, parsed);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BindingSpec {
    prefixes: BTreeMap<String, BTreeMap<String, MethodRef>>,
}

/// Resolved routes: full action type to the methods it invokes.
pub(crate) type Routes<M> = HashMap<String, Vec<M>>;

impl BindingSpec {
    /// Create an empty spec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a spec from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Bind `prefix.action` to one or more methods, replacing any previous
    /// binding for that action.
    pub fn bind(mut self, prefix: &str, action: &str, methods: impl Into<MethodRef>) -> Self {
        self.prefixes
            .entry(prefix.to_string())
            .or_default()
            .insert(action.to_string(), methods.into());
        self
    }

    /// Route `prefix.<method>` to `<method>` for each listed method.
    pub fn auto<I, S>(mut self, prefix: &str, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self
            .prefixes
            .entry(prefix.to_string())
            .or_default()
            .entry(WILDCARD.to_string())
            .or_insert_with(|| MethodRef::Many(Vec::new()));
        let mut names = entry.names().to_vec();
        names.extend(methods.into_iter().map(Into::into));
        *entry = MethodRef::Many(names);
        self
    }

    /// Whether the spec binds nothing.
    pub fn is_empty(&self) -> bool {
        self.prefixes.values().all(BTreeMap::is_empty)
    }

    /// Resolve every method name through `lookup`.
    ///
    /// Explicit bindings of an action come before wildcard bindings of the
    /// same action. Fails on the first name `lookup` does not know.
    pub(crate) fn resolve<M, F>(&self, lookup: F) -> Result<Routes<M>>
    where
        F: Fn(&str) -> Option<M>,
    {
        let mut routes: Routes<M> = HashMap::new();
        let mut push = |key: String, method: &str| -> Result<()> {
            let resolved = lookup(method).ok_or_else(|| FluxError::UnknownMethod {
                action_type: key.clone(),
                method: method.to_string(),
            })?;
            routes.entry(key).or_default().push(resolved);
            Ok(())
        };

        for (prefix, actions) in &self.prefixes {
            if prefix.is_empty() || prefix.contains(SEPARATOR) {
                return Err(FluxError::InvalidPrefix(prefix.clone()));
            }

            for (action, methods) in actions {
                if action == WILDCARD {
                    continue;
                }
                for method in methods.names() {
                    push(action_type(prefix, action), method)?;
                }
            }

            if let Some(methods) = actions.get(WILDCARD) {
                for method in methods.names() {
                    push(action_type(prefix, method), method)?;
                }
            }
        }

        Ok(routes)
    }
}
