//! Payloads and the actions that produce them.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, trace, warn, Level};
use uuid::Uuid;

use crate::error::{FluxError, FluxResult};
use crate::flux::{Flux, FluxDispatcher, FluxInner};

// ---------------------------------------------------------------------------
// Identifiers and payloads
// ---------------------------------------------------------------------------

/// Stable identifier of an action, e.g. `"location.update_city"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ActionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&ActionId> for ActionId {
    fn from(id: &ActionId) -> Self {
        id.clone()
    }
}

impl From<&Action> for ActionId {
    fn from(action: &Action) -> Self {
        action.id().clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDetails {
    pub id: ActionId,
    pub namespace: String,
    pub name: String,
}

impl ActionDetails {
    /// Details for a bare action id dispatched without a factory.
    pub fn bare(id: &ActionId) -> Self {
        Self {
            id: id.clone(),
            namespace: id.to_string(),
            name: id.to_string(),
        }
    }
}

/// The unit delivered to every store in one dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    pub dispatch_id: Uuid,
    pub action: ActionId,
    pub data: Value,
    pub details: ActionDetails,
    pub dispatched_at: DateTime<Utc>,
}

impl Payload {
    pub fn new(action: ActionId, data: Value, details: ActionDetails) -> Self {
        Self {
            dispatch_id: Uuid::new_v4(),
            action,
            data,
            details,
            dispatched_at: Utc::now(),
        }
    }

    /// Deserialize the payload data into a typed shape.
    pub fn data_as<T: DeserializeOwned>(&self) -> FluxResult<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

// ---------------------------------------------------------------------------
// Action definitions
// ---------------------------------------------------------------------------

pub type MapFn = Rc<dyn Fn(Value) -> anyhow::Result<Option<Value>>>;
pub type InjectedFn = Rc<dyn Fn(Value, &Action) -> anyhow::Result<()>>;

/// What invoking an action does with its arguments.
#[derive(Clone)]
pub enum ActionImpl {
    /// Dispatch the arguments unchanged.
    Identity,
    /// Dispatch whatever the function returns; `None` dispatches nothing.
    Map(MapFn),
    /// The function receives the action and dispatches on its own terms.
    Injected(InjectedFn),
}

impl fmt::Debug for ActionImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionImpl::Identity => f.write_str("Identity"),
            ActionImpl::Map(_) => f.write_str("Map(..)"),
            ActionImpl::Injected(_) => f.write_str("Injected(..)"),
        }
    }
}

/// Declaration of one action, consumed by the factory methods on [`Flux`].
#[derive(Debug, Clone)]
pub struct ActionDef {
    pub name: String,
    pub implementation: ActionImpl,
    pub log_as: Option<Level>,
}

impl ActionDef {
    pub fn identity(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            implementation: ActionImpl::Identity,
            log_as: None,
        }
    }

    pub fn map<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> anyhow::Result<Option<Value>> + 'static,
    {
        Self {
            name: name.into(),
            implementation: ActionImpl::Map(Rc::new(f)),
            log_as: None,
        }
    }

    pub fn injected<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value, &Action) -> anyhow::Result<()> + 'static,
    {
        Self {
            name: name.into(),
            implementation: ActionImpl::Injected(Rc::new(f)),
            log_as: None,
        }
    }

    /// Emit a tracing event at `level` every time this action dispatches.
    pub fn with_log_as(mut self, level: Level) -> Self {
        self.log_as = Some(level);
        self
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

struct ActionInner {
    details: ActionDetails,
    implementation: ActionImpl,
    log_as: Option<Level>,
    flux: Weak<FluxInner>,
}

/// A dispatchable action reference. Cloning shares the same action.
#[derive(Clone)]
pub struct Action {
    inner: Rc<ActionInner>,
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("id", &self.inner.details.id)
            .field("implementation", &self.inner.implementation)
            .finish()
    }
}

impl Action {
    pub(crate) fn new(details: ActionDetails, def: ActionDef, flux: Weak<FluxInner>) -> Self {
        Self {
            inner: Rc::new(ActionInner {
                details,
                implementation: def.implementation,
                log_as: def.log_as,
                flux,
            }),
        }
    }

    pub fn id(&self) -> &ActionId {
        &self.inner.details.id
    }

    pub fn details(&self) -> &ActionDetails {
        &self.inner.details
    }

    pub fn log_as(&self) -> Option<Level> {
        self.inner.log_as
    }

    /// Run the action's implementation with `args`.
    pub fn invoke(&self, args: Value) -> FluxResult<()> {
        match &self.inner.implementation {
            ActionImpl::Identity => self.dispatch(args),
            ActionImpl::Map(f) => match f(args)? {
                Some(data) => self.dispatch(data),
                None => {
                    warn!(action = %self.id(), "An action was called but nothing was dispatched");
                    Ok(())
                }
            },
            ActionImpl::Injected(f) => Ok(f(args, self)?),
        }
    }

    /// Deliver `data` under this action's id, bypassing the implementation.
    pub fn dispatch(&self, data: Value) -> FluxResult<()> {
        let flux = self.flux()?;
        self.log_dispatch();
        let payload = Payload::new(self.id().clone(), data, self.inner.details.clone());
        flux.dispatch_payload(payload)
    }

    /// Whether this action was issued by the context that owns `dispatcher`.
    pub(crate) fn is_issued_for(&self, dispatcher: &Rc<FluxDispatcher>) -> bool {
        self.inner.flux.upgrade().is_some_and(|flux| {
            Rc::ptr_eq(&flux.dispatcher, dispatcher) && flux.is_action_registered(self.id())
        })
    }

    fn flux(&self) -> FluxResult<Flux> {
        self.inner
            .flux
            .upgrade()
            .map(Flux::from_inner)
            .ok_or(FluxError::ContextDropped)
    }

    fn log_dispatch(&self) {
        let id = self.id();
        match self.inner.log_as {
            Some(level) if level == Level::ERROR => error!(action = %id, "dispatching"),
            Some(level) if level == Level::WARN => warn!(action = %id, "dispatching"),
            Some(level) if level == Level::INFO => info!(action = %id, "dispatching"),
            Some(level) if level == Level::DEBUG => debug!(action = %id, "dispatching"),
            _ => trace!(action = %id, "dispatching"),
        }
    }
}

// ---------------------------------------------------------------------------
// Action groups
// ---------------------------------------------------------------------------

/// Actions created together under one namespace, addressable by name and by
/// CONSTANT_CASE alias.
#[derive(Debug, Clone, Default)]
pub struct ActionGroup {
    namespace: String,
    actions: BTreeMap<String, Action>,
    constants: BTreeMap<String, ActionId>,
}

impl ActionGroup {
    pub(crate) fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Insert under a name unique within the group; returns the name used.
    pub(crate) fn insert(&mut self, name: &str, action: Action) -> String {
        let name = unique_name(name, |candidate| self.actions.contains_key(candidate));
        self.constants
            .insert(format_as_constant(&name), action.id().clone());
        self.actions.insert(name.clone(), action);
        name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn get(&self, name: &str) -> Option<&Action> {
        self.actions.get(name)
    }

    pub fn constant(&self, constant: &str) -> Option<&ActionId> {
        self.constants.get(constant)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Action)> {
        self.actions.iter().map(|(name, action)| (name.as_str(), action))
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Naming helpers
// ---------------------------------------------------------------------------

/// `name`, or `name1`, `name2`, ... until `taken` rejects none.
pub(crate) fn unique_name(name: &str, taken: impl Fn(&str) -> bool) -> String {
    let mut key = name.to_string();
    let mut count = 0;
    while taken(&key) {
        count += 1;
        key = format!("{name}{count}");
    }
    key
}

/// `updateCity` and `update_city` both become `UPDATE_CITY`.
pub fn format_as_constant(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if prev_lower && c.is_ascii_uppercase() {
            out.push('_');
        }
        prev_lower = c.is_ascii_lowercase();
        out.push(c.to_ascii_uppercase());
    }
    out
}
