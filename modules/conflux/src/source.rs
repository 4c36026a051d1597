//! Async resources bound to a store.
//!
//! An async method answers from local state when it can and otherwise calls
//! out to a remote, bracketing the call with `loading`, `success` and
//! `error` actions. The remote's future is the only suspension point in the
//! crate; settling it re-enters the dispatcher as an ordinary dispatch.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::action::Action;
use crate::error::{FluxError, FluxResult};
use crate::store::Store;

pub type RemoteFn<S> = Rc<dyn Fn(&S, &Value) -> LocalBoxFuture<'static, anyhow::Result<Value>>>;
pub type LocalFn<S> = Rc<dyn Fn(&S, &Value) -> Option<Value>>;
pub type ShouldFetchFn<S> = Rc<dyn Fn(&S, &Value) -> bool>;
/// `(result, action about to be dispatched, call arguments) -> data`.
pub type InterceptFn = Rc<dyn Fn(Value, &Action, &Value) -> Value>;

/// Declaration of one async method.
pub struct AsyncSpec<S> {
    remote: RemoteFn<S>,
    success: Option<Action>,
    error: Option<Action>,
    loading: Option<Action>,
    local: Option<LocalFn<S>>,
    should_fetch: Option<ShouldFetchFn<S>>,
    intercept: Option<InterceptFn>,
}

impl<S> AsyncSpec<S> {
    pub fn new<F>(remote: F) -> Self
    where
        F: Fn(&S, &Value) -> LocalBoxFuture<'static, anyhow::Result<Value>> + 'static,
    {
        Self {
            remote: Rc::new(remote),
            success: None,
            error: None,
            loading: None,
            local: None,
            should_fetch: None,
            intercept: None,
        }
    }

    pub fn success(mut self, action: &Action) -> Self {
        self.success = Some(action.clone());
        self
    }

    pub fn error(mut self, action: &Action) -> Self {
        self.error = Some(action.clone());
        self
    }

    pub fn loading(mut self, action: &Action) -> Self {
        self.loading = Some(action.clone());
        self
    }

    /// Answer from state; `Some` skips the remote unless `should_fetch`
    /// says otherwise.
    pub fn local<F>(mut self, local: F) -> Self
    where
        F: Fn(&S, &Value) -> Option<Value> + 'static,
    {
        self.local = Some(Rc::new(local));
        self
    }

    pub fn should_fetch<F>(mut self, should_fetch: F) -> Self
    where
        F: Fn(&S, &Value) -> bool + 'static,
    {
        self.should_fetch = Some(Rc::new(should_fetch));
        self
    }

    pub fn intercept<F>(mut self, intercept: F) -> Self
    where
        F: Fn(Value, &Action, &Value) -> Value + 'static,
    {
        self.intercept = Some(Rc::new(intercept));
        self
    }
}

/// Outcome of [`AsyncMethod::call`].
#[must_use = "the fetch only runs when the pending future is polled"]
pub enum AsyncCall {
    /// Answered without fetching; carries the local value, if any.
    Cached(Option<Value>),
    /// A fetch is in flight. Resolves to the raw remote value after the
    /// success action has been dispatched, or to the remote's error.
    Pending(LocalBoxFuture<'static, FluxResult<Value>>),
}

impl AsyncCall {
    pub fn is_pending(&self) -> bool {
        matches!(self, AsyncCall::Pending(_))
    }

    /// Wait for the call either way.
    pub async fn resolve(self) -> FluxResult<Option<Value>> {
        match self {
            AsyncCall::Cached(value) => Ok(value),
            AsyncCall::Pending(request) => request.await.map(Some),
        }
    }
}

impl fmt::Debug for AsyncCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsyncCall::Cached(value) => f.debug_tuple("Cached").field(value).finish(),
            AsyncCall::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

struct Outcomes {
    success: Action,
    error: Action,
    loading: Option<Action>,
}

/// One registered async method.
pub struct AsyncMethod<S> {
    name: String,
    store: Store<S>,
    remote: RemoteFn<S>,
    local: Option<LocalFn<S>>,
    should_fetch: Option<ShouldFetchFn<S>>,
    intercept: Option<InterceptFn>,
    outcomes: Rc<Outcomes>,
    in_flight: Rc<Cell<usize>>,
}

impl<S> Clone for AsyncMethod<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            store: self.store.clone(),
            remote: Rc::clone(&self.remote),
            local: self.local.clone(),
            should_fetch: self.should_fetch.clone(),
            intercept: self.intercept.clone(),
            outcomes: Rc::clone(&self.outcomes),
            in_flight: Rc::clone(&self.in_flight),
        }
    }
}

impl<S> fmt::Debug for AsyncMethod<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncMethod")
            .field("name", &self.name)
            .field("in_flight", &self.in_flight.get())
            .finish()
    }
}

impl<S: Clone + 'static> AsyncMethod<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True while at least one fetch started by this method is unsettled.
    pub fn is_loading(&self) -> bool {
        self.in_flight.get() > 0
    }

    pub fn call(&self, args: Value) -> FluxResult<AsyncCall> {
        let state = self.store.get_state();
        let value = self.local.as_ref().and_then(|local| local(&*state, &args));
        let fetch = match &self.should_fetch {
            Some(should_fetch) => should_fetch(&*state, &args),
            None => value.is_none(),
        };

        if !fetch {
            debug!(method = %self.name, "answered from local state");
            self.store.emit_change();
            return Ok(AsyncCall::Cached(value));
        }

        let mut in_flight = InFlight::start(&self.in_flight);
        if let Some(loading) = &self.outcomes.loading {
            // Dropping the guard on this path restores the counter.
            loading.dispatch(self.intercepted(Value::Null, loading, &args))?;
        }
        in_flight.arm(self.clone(), args.clone());

        debug!(method = %self.name, "fetching");
        let request = (self.remote)(&*state, &args);
        let method = self.clone();
        let settle = async move {
            let result = request.await;
            in_flight.settle();
            method.settle(result, &args)
        };
        Ok(AsyncCall::Pending(settle.boxed_local()))
    }

    fn settle(&self, result: anyhow::Result<Value>, args: &Value) -> FluxResult<Value> {
        match result {
            Ok(value) => {
                let success = &self.outcomes.success;
                success.dispatch(self.intercepted(value.clone(), success, args))?;
                Ok(value)
            }
            Err(err) => {
                let error = &self.outcomes.error;
                let data = self.intercepted(json!({ "message": err.to_string() }), error, args);
                if let Err(dispatch_err) = error.dispatch(data) {
                    warn!(method = %self.name, error = %dispatch_err, "failed to dispatch error action");
                }
                Err(FluxError::from(err))
            }
        }
    }

    /// The pending future was dropped before the remote settled.
    fn cancel(&self, args: &Value) {
        warn!(method = %self.name, "fetch dropped before it settled");
        let error = &self.outcomes.error;
        let data = self.intercepted(json!({ "message": "cancelled" }), error, args);
        if let Err(dispatch_err) = error.dispatch(data) {
            warn!(method = %self.name, error = %dispatch_err, "failed to dispatch error action");
        }
    }

    fn intercepted(&self, value: Value, action: &Action, args: &Value) -> Value {
        match &self.intercept {
            Some(intercept) => intercept(value, action, args),
            None => value,
        }
    }
}

/// Counts one fetch as in flight until dropped. Once armed, dropping it
/// without settling cancels the fetch.
struct InFlight<S: Clone + 'static> {
    counter: Rc<Cell<usize>>,
    unsettled: Option<(AsyncMethod<S>, Value)>,
}

impl<S: Clone + 'static> InFlight<S> {
    fn start(counter: &Rc<Cell<usize>>) -> Self {
        counter.set(counter.get() + 1);
        Self {
            counter: Rc::clone(counter),
            unsettled: None,
        }
    }

    fn arm(&mut self, method: AsyncMethod<S>, args: Value) {
        self.unsettled = Some((method, args));
    }

    fn settle(mut self) {
        self.unsettled = None;
    }
}

impl<S: Clone + 'static> Drop for InFlight<S> {
    fn drop(&mut self) {
        self.counter.set(self.counter.get().saturating_sub(1));
        if let Some((method, args)) = self.unsettled.take() {
            method.cancel(&args);
        }
    }
}

/// The async methods registered on one store.
pub struct AsyncSource<S> {
    methods: BTreeMap<String, AsyncMethod<S>>,
}

impl<S> fmt::Debug for AsyncSource<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncSource")
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<S: Clone + 'static> AsyncSource<S> {
    pub fn method(&self, name: &str) -> FluxResult<&AsyncMethod<S>> {
        self.methods
            .get(name)
            .ok_or_else(|| FluxError::UnknownMethod(name.to_string()))
    }

    pub fn call(&self, name: &str, args: Value) -> FluxResult<AsyncCall> {
        self.method(name)?.call(args)
    }

    /// True while any method is loading.
    pub fn is_loading(&self) -> bool {
        self.methods.values().any(AsyncMethod::is_loading)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}

impl<S: Clone + 'static> Store<S> {
    /// Register async methods on this store. Every `success`, `error` and
    /// `loading` action must have been issued by this store's context.
    pub fn register_async<N>(
        &self,
        specs: impl IntoIterator<Item = (N, AsyncSpec<S>)>,
    ) -> FluxResult<AsyncSource<S>>
    where
        N: Into<String>,
    {
        let mut methods = BTreeMap::new();
        for (name, spec) in specs {
            let name = name.into();
            let success = self.issued_action(spec.success, "success")?;
            let error = self.issued_action(spec.error, "error")?;
            let loading = match spec.loading {
                Some(loading) => Some(self.issued_action(Some(loading), "loading")?),
                None => None,
            };
            debug!(store = %self.display_name(), method = %name, "async method registered");
            methods.insert(
                name.clone(),
                AsyncMethod {
                    name,
                    store: self.clone(),
                    remote: spec.remote,
                    local: spec.local,
                    should_fetch: spec.should_fetch,
                    intercept: spec.intercept,
                    outcomes: Rc::new(Outcomes {
                        success,
                        error,
                        loading,
                    }),
                    in_flight: Rc::new(Cell::new(0)),
                },
            );
        }
        Ok(AsyncSource { methods })
    }

    fn issued_action(&self, action: Option<Action>, role: &'static str) -> FluxResult<Action> {
        action
            .filter(|action| action.is_issued_for(self.dispatcher()))
            .ok_or(FluxError::HandlerType { role })
    }
}
