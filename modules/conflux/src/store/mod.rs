//! Stores: state owned behind one dispatcher callback.
//!
//! A [`Store`] is built from a [`StoreModel`] and registers exactly one
//! callback with its context's dispatcher. Every payload runs through the
//! same pipeline:
//!
//! 1. reset `prevent_default`, fire `BeforeEach`
//! 2. run the handlers bound to the action (or `otherwise`), emit a change
//! 3. run the reducer if there is one, emit a change
//! 4. fire `AfterEach`
//!
//! A failing handler or reducer aborts the dispatch unless the store handles
//! its own errors, in which case the error goes to the `Error` hook and the
//! step emits nothing.

mod context;
mod model;
mod state;

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::{Rc, Weak};

use conflux_dispatcher::Token;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace, warn};

pub use context::StoreContext;
pub use model::{DeserializeFn, Handler, Hook, OutputFn, Reducer, SerializeFn, StoreModel};
pub use state::StateStrategy;

use crate::action::{ActionId, Payload};
use crate::error::{FluxError, FluxResult};
use crate::flux::FluxDispatcher;
use crate::lifecycle::{Lifecycle, LifecycleEvent};
use crate::transmitter::{ListenerId, Subscription, Transmitter, Unsubscribe};
use model::Binding;

/// Anything `wait_for` can wait on.
pub trait DispatchSource {
    fn dispatch_token(&self) -> Token;
}

impl DispatchSource for Token {
    fn dispatch_token(&self) -> Token {
        *self
    }
}

pub(crate) struct StoreInner<S> {
    display_name: String,
    token: Token,
    dispatcher: Rc<FluxDispatcher>,
    state: RefCell<Rc<S>>,
    strategy: StateStrategy,
    bindings: HashMap<ActionId, Vec<Binding<S>>>,
    otherwise: Option<Handler<S>>,
    reducer: Option<Reducer<S>>,
    hooks: RefCell<BTreeMap<Lifecycle, Transmitter<LifecycleEvent<S>>>>,
    handles_own_errors: Cell<bool>,
    prevent_default: Cell<bool>,
    handling: Cell<bool>,
    transmitter: Transmitter<S>,
    on_serialize: Option<SerializeFn<S>>,
    on_deserialize: Option<DeserializeFn>,
    output: Option<OutputFn<S>>,
}

impl<S> Drop for StoreInner<S> {
    fn drop(&mut self) {
        if self.dispatcher.unregister(self.token).is_ok() {
            trace!(store = %self.display_name, token = %self.token, "store dropped");
        }
    }
}

impl<S: Clone + 'static> StoreInner<S> {
    fn handle_dispatch(&self, payload: &Payload) -> FluxResult<()> {
        self.prevent_default.set(false);
        let _handling = HandlingGuard::enter(&self.handling);
        trace!(store = %self.display_name, action = %payload.action, "handling payload");

        self.fire(Lifecycle::BeforeEach, || LifecycleEvent::BeforeEach {
            payload: payload.clone(),
            state: self.current(),
        });

        let ctx = StoreContext::new(self, payload);
        let bound = self
            .bindings
            .get(&payload.action)
            .filter(|bindings| !bindings.is_empty());
        let handled = match (bound, &self.otherwise) {
            (Some(bindings), _) => Some(self.absorb(payload, || {
                bindings
                    .iter()
                    .try_for_each(|binding| (binding.handler)(&ctx, &payload.data))
            })?),
            (None, Some(otherwise)) => {
                Some(self.absorb(payload, || otherwise(&ctx, &payload.data))?)
            }
            (None, None) => None,
        };
        if handled == Some(true) && !self.prevent_default.get() {
            self.emit_change();
        }

        if let Some(reducer) = &self.reducer {
            let reduced = self.absorb(payload, || {
                let current = self.current();
                if let Some(next) = reducer(&*current, payload)? {
                    self.replace_state(next);
                }
                Ok(())
            })?;
            if reduced && !self.prevent_default.get() {
                self.emit_change();
            }
        }

        self.fire(Lifecycle::AfterEach, || LifecycleEvent::AfterEach {
            payload: payload.clone(),
            state: self.current(),
        });
        Ok(())
    }

    /// Run one pipeline step. `Ok(false)` means the step failed and the
    /// error went to the `Error` hook.
    fn absorb(
        &self,
        payload: &Payload,
        step: impl FnOnce() -> anyhow::Result<()>,
    ) -> FluxResult<bool> {
        let err = match step() {
            Ok(()) => return Ok(true),
            Err(err) => FluxError::from(err),
        };
        if !self.handles_own_errors.get() {
            return Err(err);
        }
        warn!(store = %self.display_name, action = %payload.action, error = %err, "handler failed");
        let error = Rc::new(err);
        self.fire(Lifecycle::Error, || LifecycleEvent::Error {
            error,
            payload: payload.clone(),
            state: self.current(),
        });
        Ok(false)
    }

    fn fire(&self, kind: Lifecycle, event: impl FnOnce() -> LifecycleEvent<S>) {
        let hook = self.hooks.borrow().get(&kind).cloned();
        if let Some(hook) = hook.filter(|hook| !hook.is_empty()) {
            hook.publish(&event());
        }
    }

    fn subscribe_hook(&self, kind: Lifecycle, hook: Hook<S>) -> Subscription {
        if kind == Lifecycle::Error {
            self.handles_own_errors.set(true);
        }
        let transmitter = self.hooks.borrow_mut().entry(kind).or_default().clone();
        transmitter.subscribe(move |event| hook(event))
    }

    /// The stored value itself, regardless of strategy.
    fn current(&self) -> Rc<S> {
        Rc::clone(&self.state.borrow())
    }

    fn read_state(&self) -> Rc<S> {
        self.strategy.read(&self.state.borrow())
    }

    fn replace_state(&self, next: S) {
        let previous = self.state.replace(Rc::new(next));
        drop(previous);
    }

    fn update_state(&self, edit: impl FnOnce(&mut S)) {
        let mut next = S::clone(&self.current());
        edit(&mut next);
        self.replace_state(next);
    }

    fn emit_change(&self) {
        let state = self.current();
        match &self.output {
            Some(output) => self.transmitter.publish(&output(&*state)),
            None => self.transmitter.publish(&state),
        }
    }

    fn wait_for(&self, sources: &[&dyn DispatchSource]) -> FluxResult<()> {
        if sources.is_empty() {
            return Err(FluxError::MissingDependencies);
        }
        let tokens: Vec<Token> = sources.iter().map(|source| source.dispatch_token()).collect();
        self.dispatcher.wait_for(&tokens)
    }
}

impl<S: Clone + 'static> Unsubscribe for StoreInner<S> {
    fn unsubscribe(&self, id: ListenerId) -> bool {
        let removed = self.transmitter.unsubscribe(id);
        if removed {
            self.fire(Lifecycle::Unlisten, || LifecycleEvent::Unlisten);
        }
        removed
    }
}

/// Marks the store as handling its own callback for the guard's lifetime.
struct HandlingGuard<'a> {
    flag: &'a Cell<bool>,
    previous: bool,
}

impl<'a> HandlingGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        let previous = flag.replace(true);
        Self { flag, previous }
    }
}

impl Drop for HandlingGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(self.previous);
    }
}

/// Handle to a store. Clones share the same store; the dispatcher callback
/// is unregistered when the last handle is dropped.
pub struct Store<S> {
    inner: Rc<StoreInner<S>>,
}

impl<S> Clone for Store<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S> fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("display_name", &self.inner.display_name)
            .field("token", &self.inner.token)
            .field("strategy", &self.inner.strategy)
            .finish()
    }
}

impl<S> DispatchSource for Store<S> {
    fn dispatch_token(&self) -> Token {
        self.inner.token
    }
}

impl<S: Clone + 'static> Store<S> {
    pub(crate) fn build(
        dispatcher: Rc<FluxDispatcher>,
        display_name: String,
        model: StoreModel<S>,
        default_strategy: StateStrategy,
    ) -> Self {
        let StoreModel {
            state,
            strategy,
            bindings,
            otherwise,
            reducer,
            hooks,
            handles_own_errors,
            on_serialize,
            on_deserialize,
            output,
            ..
        } = model;

        let inner = Rc::new_cyclic(|weak: &Weak<StoreInner<S>>| {
            let weak = weak.clone();
            let token = dispatcher.register(move |payload: &Payload| match weak.upgrade() {
                Some(store) => store.handle_dispatch(payload),
                None => Ok(()),
            });
            StoreInner {
                display_name,
                token,
                dispatcher,
                state: RefCell::new(Rc::new(state)),
                strategy: strategy.unwrap_or(default_strategy),
                bindings,
                otherwise,
                reducer,
                hooks: RefCell::new(BTreeMap::new()),
                handles_own_errors: Cell::new(handles_own_errors),
                prevent_default: Cell::new(false),
                handling: Cell::new(false),
                transmitter: Transmitter::new(),
                on_serialize,
                on_deserialize,
                output,
            }
        });

        for (kind, hook) in hooks {
            // Model-level hooks live as long as the store.
            let _ = inner.subscribe_hook(kind, hook);
        }

        let store = Self { inner };
        debug!(
            store = %store.display_name(),
            token = %store.dispatch_token(),
            strategy = %store.inner.strategy,
            "store registered"
        );
        store.inner.fire(Lifecycle::Init, || LifecycleEvent::Init);
        store
    }

    pub fn display_name(&self) -> &str {
        &self.inner.display_name
    }

    pub fn strategy(&self) -> StateStrategy {
        self.inner.strategy
    }

    /// Current state under the store's strategy: a detached copy for
    /// `Copy`, the shared value for `Replace`.
    pub fn get_state(&self) -> Rc<S> {
        self.inner.read_state()
    }

    /// Replace the state.
    ///
    /// While this store is handling a payload the change is left for the
    /// pipeline to emit. Outside any dispatch it is emitted immediately.
    /// While another dispatch is running it is rejected.
    pub fn set_state(&self, next: S) -> FluxResult<()> {
        self.check_writable()?;
        self.inner.replace_state(next);
        self.emit_if_idle();
        Ok(())
    }

    /// Like [`Store::set_state`], editing a copy of the current state.
    pub fn update(&self, edit: impl FnOnce(&mut S)) -> FluxResult<()> {
        self.check_writable()?;
        self.inner.update_state(edit);
        self.emit_if_idle();
        Ok(())
    }

    /// Called with the new state after every change.
    pub fn listen(&self, listener: impl Fn(&S) + 'static) -> Subscription {
        let id = self.inner.transmitter.subscribe(listener).id();
        let source: Weak<dyn Unsubscribe> = Rc::downgrade(&self.inner) as Weak<dyn Unsubscribe>;
        Subscription::new(id, source)
    }

    pub fn unlisten(&self, id: ListenerId) -> bool {
        self.inner.unsubscribe(id)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.transmitter.len()
    }

    /// Add a lifecycle hook after construction.
    pub fn on(&self, kind: Lifecycle, hook: impl Fn(&LifecycleEvent<S>) + 'static) -> Subscription {
        self.inner.subscribe_hook(kind, Rc::new(hook))
    }

    pub fn emit_change(&self) {
        self.inner.emit_change();
    }

    /// Wait for other stores (or raw tokens) to handle the current payload.
    pub fn wait_for(&self, sources: &[&dyn DispatchSource]) -> FluxResult<()> {
        self.inner.wait_for(sources)
    }

    pub(crate) fn dispatcher(&self) -> &Rc<FluxDispatcher> {
        &self.inner.dispatcher
    }

    fn check_writable(&self) -> FluxResult<()> {
        if self.inner.dispatcher.is_dispatching() && !self.inner.handling.get() {
            return Err(FluxError::SetStateDuringDispatch {
                store: self.inner.display_name.clone(),
            });
        }
        Ok(())
    }

    fn emit_if_idle(&self) {
        if !self.inner.dispatcher.is_dispatching() {
            self.inner.emit_change();
        }
    }
}

/// Snapshot plumbing.
impl<S> Store<S>
where
    S: Clone + Serialize + DeserializeOwned + 'static,
{
    pub(crate) fn snapshot_value(&self) -> FluxResult<Value> {
        let state = self.inner.current();
        match &self.inner.on_serialize {
            Some(serialize) => Ok(serialize(&*state)?),
            None => Ok(serde_json::to_value(&*state)?),
        }
    }

    pub(crate) fn restore_value(&self, value: Value) -> FluxResult<()> {
        let value = match &self.inner.on_deserialize {
            Some(deserialize) => deserialize(value)?,
            None => value,
        };
        let next: S = serde_json::from_value(value)?;
        self.inner.replace_state(next);
        Ok(())
    }

    pub(crate) fn announce(&self, kind: Lifecycle) {
        match kind {
            Lifecycle::Bootstrap => self.inner.fire(kind, || LifecycleEvent::Bootstrap {
                state: self.inner.current(),
            }),
            Lifecycle::Snapshot => self.inner.fire(kind, || LifecycleEvent::Snapshot),
            Lifecycle::Rollback => self.inner.fire(kind, || LifecycleEvent::Rollback),
            Lifecycle::Init => self.inner.fire(kind, || LifecycleEvent::Init),
            other => warn!(store = %self.display_name(), hook = %other, "not a snapshot hook"),
        }
    }

    pub(crate) fn as_any(&self) -> &dyn Any {
        self
    }
}
