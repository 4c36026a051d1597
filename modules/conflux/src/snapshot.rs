//! Saving and restoring the state of every registered store.

use std::any::Any;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::codec::SnapshotMap;
use crate::error::{FluxError, FluxResult};
use crate::flux::Flux;
use crate::lifecycle::Lifecycle;
use crate::store::Store;

/// A registered store with its state type erased.
pub(crate) trait ManagedStore {
    fn snapshot_value(&self) -> FluxResult<Value>;
    fn restore_value(&self, value: Value) -> FluxResult<()>;
    fn announce(&self, kind: Lifecycle);
    fn emit_change(&self);
    fn as_any(&self) -> &dyn Any;
}

impl<S> ManagedStore for Store<S>
where
    S: Clone + Serialize + DeserializeOwned + 'static,
{
    fn snapshot_value(&self) -> FluxResult<Value> {
        Store::snapshot_value(self)
    }

    fn restore_value(&self, value: Value) -> FluxResult<()> {
        Store::restore_value(self, value)
    }

    fn announce(&self, kind: Lifecycle) {
        Store::announce(self, kind)
    }

    fn emit_change(&self) {
        Store::emit_change(self)
    }

    fn as_any(&self) -> &dyn Any {
        Store::as_any(self)
    }
}

impl Flux {
    /// Encode the named stores (all stores when `names` is empty), fold the
    /// result into the last snapshot and return it.
    pub fn take_snapshot(&self, names: &[&str]) -> FluxResult<String> {
        let snapshot = self.snapshot(names)?;
        self.inner()
            .snapshots
            .borrow_mut()
            .last
            .extend(snapshot.clone());
        self.inner().config.codec.serialize(&snapshot)
    }

    /// Restore every store to the last snapshot.
    pub fn rollback(&self) -> FluxResult<()> {
        let last = self.inner().snapshots.borrow().last.clone();
        let raw = self.inner().config.codec.serialize(&last)?;
        self.set_app_state(&raw, Lifecycle::Rollback)
    }

    /// Restore the named stores (all when `names` is empty) to their
    /// initial state.
    pub fn recycle(&self, names: &[&str]) -> FluxResult<()> {
        let initial = self.inner().snapshots.borrow().initial.clone();
        let selected = if names.is_empty() {
            initial
        } else {
            names
                .iter()
                .map(|name| match initial.get(*name) {
                    Some(state) => Ok((name.to_string(), state.clone())),
                    None => Err(FluxError::InvalidStore(name.to_string())),
                })
                .collect::<FluxResult<SnapshotMap>>()?
        };
        let raw = self.inner().config.codec.serialize(&selected)?;
        self.set_app_state(&raw, Lifecycle::Init)
    }

    /// Snapshot everything, then recycle everything. The last snapshot is
    /// left untouched.
    pub fn flush(&self) -> FluxResult<String> {
        let snapshot = self.snapshot(&[])?;
        let raw = self.inner().config.codec.serialize(&snapshot)?;
        self.recycle(&[])?;
        Ok(raw)
    }

    /// Restore stores from an encoded blob. Names without a registered
    /// store are ignored.
    pub fn bootstrap(&self, raw: &str) -> FluxResult<()> {
        self.set_app_state(raw, Lifecycle::Bootstrap)
    }

    /// Encode `data` as a blob that bootstraps `store`.
    pub fn prepare<S: Clone + 'static>(&self, store: &Store<S>, data: Value) -> FluxResult<String> {
        if store.display_name().is_empty() {
            return Err(FluxError::MissingStoreName);
        }
        let mut blob = SnapshotMap::new();
        blob.insert(store.display_name().to_string(), data);
        self.inner().config.codec.serialize(&blob)
    }

    fn snapshot(&self, names: &[&str]) -> FluxResult<SnapshotMap> {
        let stores = self.resolve(names)?;
        let mut snapshot = SnapshotMap::new();
        for (name, store) in stores {
            store.announce(Lifecycle::Snapshot);
            snapshot.insert(name, store.snapshot_value()?);
        }
        Ok(snapshot)
    }

    fn resolve(&self, names: &[&str]) -> FluxResult<Vec<(String, Rc<dyn ManagedStore>)>> {
        let stores = self.inner().stores.borrow();
        if names.is_empty() {
            return Ok(stores
                .iter()
                .map(|(name, store)| (name.clone(), Rc::clone(store)))
                .collect());
        }
        names
            .iter()
            .map(|name| {
                stores
                    .get(*name)
                    .map(|store| (name.to_string(), Rc::clone(store)))
                    .ok_or_else(|| FluxError::InvalidStore(name.to_string()))
            })
            .collect()
    }

    fn set_app_state(&self, raw: &str, kind: Lifecycle) -> FluxResult<()> {
        let decoded = self.inner().config.codec.deserialize(raw)?;
        debug!(stores = decoded.len(), hook = %kind, "restoring app state");
        for (name, value) in decoded {
            let store = self.inner().stores.borrow().get(&name).cloned();
            let Some(store) = store else {
                trace!(store = %name, "no registered store; skipped");
                continue;
            };
            store.restore_value(value)?;
            store.announce(kind);
            store.emit_change();
        }
        Ok(())
    }
}
