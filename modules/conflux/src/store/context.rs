use std::rc::Rc;

use super::{DispatchSource, StoreInner};
use crate::action::{ActionId, Payload};
use crate::error::FluxResult;

/// What a handler sees while its store handles one payload.
pub struct StoreContext<'a, S> {
    store: &'a StoreInner<S>,
    payload: &'a Payload,
}

impl<'a, S: Clone + 'static> StoreContext<'a, S> {
    pub(crate) fn new(store: &'a StoreInner<S>, payload: &'a Payload) -> Self {
        Self { store, payload }
    }

    pub fn payload(&self) -> &Payload {
        self.payload
    }

    pub fn action(&self) -> &ActionId {
        &self.payload.action
    }

    pub fn display_name(&self) -> &str {
        &self.store.display_name
    }

    /// Current state, read under the store's strategy.
    pub fn state(&self) -> Rc<S> {
        self.store.read_state()
    }

    /// Replace the state. The change is emitted when handling finishes.
    pub fn set_state(&self, next: S) {
        self.store.replace_state(next);
    }

    /// Edit a copy of the state and install it.
    pub fn update(&self, edit: impl FnOnce(&mut S)) {
        self.store.update_state(edit);
    }

    /// Suppress the change notification for this payload.
    pub fn prevent_default(&self) {
        self.store.prevent_default.set(true);
    }

    pub fn wait_for(&self, sources: &[&dyn DispatchSource]) -> FluxResult<()> {
        self.store.wait_for(sources)
    }

    pub fn emit_change(&self) {
        self.store.emit_change();
    }
}
