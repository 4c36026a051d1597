//! Unidirectional data flow on top of `conflux-dispatcher`.
//!
//! A [`Flux`] context owns one dispatcher. Actions created by the context
//! dispatch payloads through it; stores built from a [`StoreModel`] receive
//! every payload, update their state and notify listeners. Async methods
//! registered on a store wrap a remote call in loading/success/error
//! actions. Everything is single-threaded.

pub mod action;
pub mod codec;
pub mod config;
pub mod error;
pub mod flux;
pub mod lifecycle;
pub mod snapshot;
pub mod source;
pub mod store;
pub mod transmitter;

pub use action::{
    format_as_constant, Action, ActionDef, ActionDetails, ActionGroup, ActionId, ActionImpl,
    Payload,
};
pub use codec::{JsonCodec, SnapshotMap, StateCodec};
pub use config::{Batching, FluxConfig, Immediate};
pub use conflux_dispatcher::{DispatchError, Token};
pub use error::{FluxError, FluxResult};
pub use flux::{Flux, FluxDispatcher, GLOBAL_NAMESPACE};
pub use lifecycle::{Lifecycle, LifecycleEvent};
pub use source::{AsyncCall, AsyncMethod, AsyncSource, AsyncSpec};
pub use store::{DispatchSource, StateStrategy, Store, StoreContext, StoreModel};
pub use transmitter::{ListenerId, Subscription, Transmitter};
