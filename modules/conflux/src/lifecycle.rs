//! Store lifecycle hooks.

use std::fmt;
use std::rc::Rc;

use crate::action::Payload;
use crate::error::FluxError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Lifecycle {
    Init,
    BeforeEach,
    AfterEach,
    Error,
    Snapshot,
    Rollback,
    Bootstrap,
    Unlisten,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Init => "init",
            Lifecycle::BeforeEach => "before-each",
            Lifecycle::AfterEach => "after-each",
            Lifecycle::Error => "error",
            Lifecycle::Snapshot => "snapshot",
            Lifecycle::Rollback => "rollback",
            Lifecycle::Bootstrap => "bootstrap",
            Lifecycle::Unlisten => "unlisten",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a lifecycle hook receives.
#[derive(Debug, Clone)]
pub enum LifecycleEvent<S> {
    Init,
    BeforeEach {
        payload: Payload,
        state: Rc<S>,
    },
    AfterEach {
        payload: Payload,
        state: Rc<S>,
    },
    /// A handler or reducer failed in a store that handles its own errors.
    Error {
        error: Rc<FluxError>,
        payload: Payload,
        state: Rc<S>,
    },
    Snapshot,
    Rollback,
    Bootstrap {
        state: Rc<S>,
    },
    Unlisten,
}

impl<S> LifecycleEvent<S> {
    pub fn kind(&self) -> Lifecycle {
        match self {
            LifecycleEvent::Init => Lifecycle::Init,
            LifecycleEvent::BeforeEach { .. } => Lifecycle::BeforeEach,
            LifecycleEvent::AfterEach { .. } => Lifecycle::AfterEach,
            LifecycleEvent::Error { .. } => Lifecycle::Error,
            LifecycleEvent::Snapshot => Lifecycle::Snapshot,
            LifecycleEvent::Rollback => Lifecycle::Rollback,
            LifecycleEvent::Bootstrap { .. } => Lifecycle::Bootstrap,
            LifecycleEvent::Unlisten => Lifecycle::Unlisten,
        }
    }
}
