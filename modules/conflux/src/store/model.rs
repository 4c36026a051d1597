use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use serde_json::Value;

use super::context::StoreContext;
use super::state::StateStrategy;
use crate::action::{ActionGroup, ActionId, Payload};
use crate::error::{FluxError, FluxResult};
use crate::lifecycle::{Lifecycle, LifecycleEvent};

pub type Handler<S> = Rc<dyn Fn(&StoreContext<'_, S>, &Value) -> anyhow::Result<()>>;

/// `Ok(Some(next))` replaces the state; `Ok(None)` leaves it as is.
pub type Reducer<S> = Rc<dyn Fn(&S, &Payload) -> anyhow::Result<Option<S>>>;

pub type Hook<S> = Rc<dyn Fn(&LifecycleEvent<S>)>;

pub type SerializeFn<S> = Rc<dyn Fn(&S) -> anyhow::Result<Value>>;
pub type DeserializeFn = Rc<dyn Fn(Value) -> anyhow::Result<Value>>;
/// Shapes the value listeners receive; stored state is untouched.
pub type OutputFn<S> = Rc<dyn Fn(&S) -> S>;

pub(crate) struct Binding<S> {
    pub(crate) name: String,
    pub(crate) handler: Handler<S>,
}

impl<S> Clone for Binding<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            handler: Rc::clone(&self.handler),
        }
    }
}

/// Everything a store is built from.
///
/// Named handlers are declared with [`StoreModel::handler`] and then bound
/// to actions with [`StoreModel::bind`], [`StoreModel::bind_listeners`] or
/// [`StoreModel::bind_actions`]. [`StoreModel::on_action`] declares and binds
/// an anonymous handler in one step.
///
/// ```ignore
/// let model = StoreModel::new("LocationStore", Location::default())
///     .handler("update_city", |ctx, data| {
///         let city = serde_json::from_value(data.clone())?;
///         ctx.update(|s| s.city = city);
///         Ok(())
///     })
///     .bind(&update_city, "update_city")?;
/// ```
pub struct StoreModel<S> {
    pub(crate) display_name: String,
    pub(crate) state: S,
    pub(crate) strategy: Option<StateStrategy>,
    pub(crate) handlers: BTreeMap<String, Handler<S>>,
    pub(crate) bindings: HashMap<ActionId, Vec<Binding<S>>>,
    pub(crate) otherwise: Option<Handler<S>>,
    pub(crate) reducer: Option<Reducer<S>>,
    pub(crate) hooks: Vec<(Lifecycle, Hook<S>)>,
    pub(crate) handles_own_errors: bool,
    pub(crate) on_serialize: Option<SerializeFn<S>>,
    pub(crate) on_deserialize: Option<DeserializeFn>,
    pub(crate) output: Option<OutputFn<S>>,
    pub(crate) anonymous: usize,
}

impl<S: Clone + 'static> StoreModel<S> {
    pub fn new(display_name: impl Into<String>, state: S) -> Self {
        Self {
            display_name: display_name.into(),
            state,
            strategy: None,
            handlers: BTreeMap::new(),
            bindings: HashMap::new(),
            otherwise: None,
            reducer: None,
            hooks: Vec::new(),
            handles_own_errors: false,
            on_serialize: None,
            on_deserialize: None,
            output: None,
            anonymous: 0,
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Overrides the context's default strategy for this store.
    pub fn strategy(mut self, strategy: StateStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Declare a named handler. Redeclaring a name replaces the handler for
    /// later bindings only.
    pub fn handler<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&StoreContext<'_, S>, &Value) -> anyhow::Result<()> + 'static,
    {
        self.handlers.insert(name.into(), Rc::new(handler));
        self
    }

    /// Bind the handler declared as `name` to `action`.
    pub fn bind(mut self, action: impl Into<ActionId>, name: &str) -> FluxResult<Self> {
        self.bind_named(action.into(), name)?;
        Ok(self)
    }

    /// Bind each declared handler to every action listed for it.
    pub fn bind_listeners<'a, L, A>(
        mut self,
        listeners: impl IntoIterator<Item = (&'a str, L)>,
    ) -> FluxResult<Self>
    where
        L: IntoIterator<Item = A>,
        A: Into<ActionId>,
    {
        for (name, actions) in listeners {
            for action in actions {
                self.bind_named(action.into(), name)?;
            }
        }
        Ok(self)
    }

    /// Bind every action of `group` to the handler declared under its name
    /// or under `on_<name>`. Actions with neither are skipped; both is an
    /// error.
    pub fn bind_actions(mut self, group: &ActionGroup) -> FluxResult<Self> {
        for (name, action) in group.iter() {
            let on_name = format!("on_{name}");
            let plain = self.handlers.contains_key(name);
            let prefixed = self.handlers.contains_key(&on_name);
            match (plain, prefixed) {
                (true, true) => {
                    return Err(FluxError::DuplicateBinding {
                        action: action.id().to_string(),
                        first: name.to_string(),
                        second: on_name,
                    })
                }
                (true, false) => self.bind_named(action.id().clone(), name)?,
                (false, true) => self.bind_named(action.id().clone(), &on_name)?,
                (false, false) => {}
            }
        }
        Ok(self)
    }

    /// Bind an anonymous handler to `action`.
    pub fn on_action<F>(mut self, action: impl Into<ActionId>, handler: F) -> Self
    where
        F: Fn(&StoreContext<'_, S>, &Value) -> anyhow::Result<()> + 'static,
    {
        let action = action.into();
        self.anonymous += 1;
        let name = format!("{action}#{}", self.anonymous);
        self.bindings.entry(action).or_default().push(Binding {
            name,
            handler: Rc::new(handler),
        });
        self
    }

    /// Runs for payloads no handler is bound to.
    pub fn otherwise<F>(mut self, handler: F) -> Self
    where
        F: Fn(&StoreContext<'_, S>, &Value) -> anyhow::Result<()> + 'static,
    {
        self.otherwise = Some(Rc::new(handler));
        self
    }

    pub fn reduce<F>(mut self, reducer: F) -> Self
    where
        F: Fn(&S, &Payload) -> anyhow::Result<Option<S>> + 'static,
    {
        self.reducer = Some(Rc::new(reducer));
        self
    }

    /// Add a lifecycle hook. An `Error` hook makes the store handle its own
    /// errors.
    pub fn on<F>(mut self, kind: Lifecycle, hook: F) -> Self
    where
        F: Fn(&LifecycleEvent<S>) + 'static,
    {
        if kind == Lifecycle::Error {
            self.handles_own_errors = true;
        }
        self.hooks.push((kind, Rc::new(hook)));
        self
    }

    pub fn handles_own_errors(mut self, yes: bool) -> Self {
        self.handles_own_errors = yes;
        self
    }

    /// Transform the state before it is written into a snapshot.
    pub fn on_serialize<F>(mut self, f: F) -> Self
    where
        F: Fn(&S) -> anyhow::Result<Value> + 'static,
    {
        self.on_serialize = Some(Rc::new(f));
        self
    }

    /// Transform snapshot data before it is decoded back into state.
    pub fn on_deserialize<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> anyhow::Result<Value> + 'static,
    {
        self.on_deserialize = Some(Rc::new(f));
        self
    }

    /// Transform the state handed to listeners on every change.
    pub fn output<F>(mut self, f: F) -> Self
    where
        F: Fn(&S) -> S + 'static,
    {
        self.output = Some(Rc::new(f));
        self
    }

    fn bind_named(&mut self, action: ActionId, name: &str) -> FluxResult<()> {
        let handler = self
            .handlers
            .get(name)
            .cloned()
            .ok_or_else(|| FluxError::UnknownListener {
                name: name.to_string(),
                store: self.display_name.clone(),
            })?;
        let bound = self.bindings.entry(action.clone()).or_default();
        if bound.iter().any(|binding| binding.name == name) {
            return Err(FluxError::DuplicateBinding {
                action: action.to_string(),
                first: name.to_string(),
                second: name.to_string(),
            });
        }
        bound.push(Binding {
            name: name.to_string(),
            handler,
        });
        Ok(())
    }
}
