//! The application context: one dispatcher, its actions and its stores.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::rc::Rc;

use conflux_dispatcher::Dispatcher;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::action::{unique_name, Action, ActionDef, ActionDetails, ActionGroup, ActionId, Payload};
use crate::codec::SnapshotMap;
use crate::config::FluxConfig;
use crate::error::{FluxError, FluxResult};
use crate::snapshot::ManagedStore;
use crate::store::{Store, StoreModel};

pub type FluxDispatcher = Dispatcher<Payload, FluxError>;

/// Namespace for actions created without one.
pub const GLOBAL_NAMESPACE: &str = "global";

#[derive(Default)]
pub(crate) struct Snapshots {
    pub(crate) initial: SnapshotMap,
    pub(crate) last: SnapshotMap,
}

pub(crate) struct FluxInner {
    pub(crate) dispatcher: Rc<FluxDispatcher>,
    pub(crate) config: FluxConfig,
    registry: RefCell<HashSet<ActionId>>,
    groups: RefCell<BTreeMap<String, ActionGroup>>,
    pub(crate) stores: RefCell<BTreeMap<String, Rc<dyn ManagedStore>>>,
    pub(crate) snapshots: RefCell<Snapshots>,
}

impl FluxInner {
    pub(crate) fn is_action_registered(&self, id: &ActionId) -> bool {
        self.registry.borrow().contains(id)
    }
}

/// Owns one dispatcher and everything registered against it. Clones share
/// the same context.
#[derive(Clone)]
pub struct Flux {
    inner: Rc<FluxInner>,
}

impl fmt::Debug for Flux {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flux")
            .field("config", &self.inner.config)
            .field("stores", &self.inner.stores.borrow().keys().collect::<Vec<_>>())
            .field("actions", &self.inner.registry.borrow().len())
            .finish()
    }
}

impl Default for Flux {
    fn default() -> Self {
        Self::new(FluxConfig::default())
    }
}

impl Flux {
    pub fn new(config: FluxConfig) -> Self {
        debug!(codec = config.codec.name(), strategy = %config.default_strategy, "flux context created");
        Self {
            inner: Rc::new(FluxInner {
                dispatcher: Rc::new(FluxDispatcher::new()),
                config,
                registry: RefCell::new(HashSet::new()),
                groups: RefCell::new(BTreeMap::new()),
                stores: RefCell::new(BTreeMap::new()),
                snapshots: RefCell::new(Snapshots::default()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<FluxInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &FluxInner {
        &self.inner
    }

    pub fn config(&self) -> &FluxConfig {
        &self.inner.config
    }

    /// The underlying dispatcher, for registering raw callbacks.
    pub fn dispatcher(&self) -> &Rc<FluxDispatcher> {
        &self.inner.dispatcher
    }

    pub fn is_dispatching(&self) -> bool {
        self.inner.dispatcher.is_dispatching()
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Dispatch `data` under a bare action id.
    pub fn dispatch(&self, action: impl Into<ActionId>, data: Value) -> FluxResult<()> {
        let action = action.into();
        let details = ActionDetails::bare(&action);
        self.dispatch_payload(Payload::new(action, data, details))
    }

    pub(crate) fn dispatch_payload(&self, payload: Payload) -> FluxResult<()> {
        let mut payload = Some(payload);
        self.inner.config.batching.batch(&mut || match payload.take() {
            Some(payload) => self.inner.dispatcher.dispatch(payload),
            None => Ok(()),
        })
    }

    // -----------------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------------

    /// A single action in the global namespace.
    pub fn create_action(&self, def: ActionDef) -> Action {
        let mut groups = self.inner.groups.borrow_mut();
        let group = groups
            .entry(GLOBAL_NAMESPACE.to_string())
            .or_insert_with(|| ActionGroup::new(GLOBAL_NAMESPACE));
        let action = self.make_action(GLOBAL_NAMESPACE, def);
        let name = action.details().name.clone();
        group.insert(&name, action.clone());
        action
    }

    /// Identity actions in the global namespace, one per name.
    pub fn generate_actions(&self, names: &[&str]) -> ActionGroup {
        self.create_actions(
            GLOBAL_NAMESPACE,
            names.iter().map(|name| ActionDef::identity(*name)),
        )
    }

    pub fn create_actions(
        &self,
        namespace: &str,
        defs: impl IntoIterator<Item = ActionDef>,
    ) -> ActionGroup {
        let mut group = ActionGroup::new(namespace);
        for def in defs {
            let name = def.name.clone();
            let action = self.make_action(namespace, def);
            group.insert(&name, action);
        }
        debug!(namespace, actions = group.len(), "actions created");
        group
    }

    /// Create a group and keep it under `name` for [`Flux::get_actions`].
    pub fn add_actions(
        &self,
        name: &str,
        defs: impl IntoIterator<Item = ActionDef>,
    ) -> ActionGroup {
        let group = self.create_actions(name, defs);
        self.inner
            .groups
            .borrow_mut()
            .insert(name.to_string(), group.clone());
        group
    }

    pub fn get_actions(&self, name: &str) -> Option<ActionGroup> {
        self.inner.groups.borrow().get(name).cloned()
    }

    fn make_action(&self, namespace: &str, def: ActionDef) -> Action {
        let mut registry = self.inner.registry.borrow_mut();
        let id = unique_name(&format!("{namespace}.{}", def.name), |candidate| {
            registry.contains(&ActionId::new(candidate))
        });
        let id = ActionId::new(id);
        registry.insert(id.clone());
        let details = ActionDetails {
            id,
            namespace: namespace.to_string(),
            name: def.name.clone(),
        };
        Action::new(details, def, Rc::downgrade(&self.inner))
    }

    // -----------------------------------------------------------------------
    // Stores
    // -----------------------------------------------------------------------

    /// Build a store and keep it under `name` (the model's display name if
    /// `name` is empty). A missing or taken name is made unique with a
    /// warning. The initial state is recorded as the store's initial and
    /// last snapshot.
    pub fn create_store<S>(&self, name: &str, model: StoreModel<S>) -> FluxResult<Store<S>>
    where
        S: Clone + Serialize + DeserializeOwned + 'static,
    {
        let requested = if name.is_empty() {
            model.display_name().to_string()
        } else {
            name.to_string()
        };
        let key = {
            let stores = self.inner.stores.borrow();
            if requested.is_empty() {
                warn!("Store name was not specified");
                unique_name(&requested, |candidate| stores.contains_key(candidate))
            } else if stores.contains_key(&requested) {
                warn!(
                    store = %requested,
                    "A store with this name already exists; pass a unique name for each store"
                );
                unique_name(&requested, |candidate| stores.contains_key(candidate))
            } else {
                requested
            }
        };

        let store = Store::build(
            Rc::clone(&self.inner.dispatcher),
            key.clone(),
            model,
            self.inner.config.default_strategy,
        );

        let codec = &self.inner.config.codec;
        let mut initial = SnapshotMap::new();
        initial.insert(key.clone(), store.snapshot_value()?);
        let initial = codec.deserialize(&codec.serialize(&initial)?)?;

        {
            let mut snapshots = self.inner.snapshots.borrow_mut();
            snapshots.initial.extend(initial.clone());
            snapshots.last.extend(initial);
        }
        self.inner
            .stores
            .borrow_mut()
            .insert(key, Rc::new(store.clone()));
        Ok(store)
    }

    /// Build a store that takes part in dispatches but not in snapshots.
    pub fn create_unsaved_store<S: Clone + 'static>(&self, model: StoreModel<S>) -> Store<S> {
        let name = model.display_name().to_string();
        Store::build(
            Rc::clone(&self.inner.dispatcher),
            name,
            model,
            self.inner.config.default_strategy,
        )
    }

    /// Typed handle to a registered store. `None` for an unknown name or a
    /// different state type.
    pub fn get_store<S>(&self, name: &str) -> Option<Store<S>>
    where
        S: Clone + Serialize + DeserializeOwned + 'static,
    {
        self.inner
            .stores
            .borrow()
            .get(name)
            .and_then(|store| store.as_any().downcast_ref::<Store<S>>().cloned())
    }

    pub fn store_names(&self) -> Vec<String> {
        self.inner.stores.borrow().keys().cloned().collect()
    }
}
