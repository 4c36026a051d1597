//! The broadcast loop.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::error::DispatchError;

/// Opaque handle for a registered callback.
///
/// Tokens are minted from a monotonically increasing counter, so ordering
/// tokens orders registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(u64);

impl Token {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID_{}", self.0)
    }
}

pub type Callback<P, E> = Rc<dyn Fn(&P) -> Result<(), E>>;

#[derive(Debug, Default, Clone, Copy)]
struct Flags {
    /// Invocation has started this session.
    pending: bool,
    /// Invocation has completed this session.
    handled: bool,
}

struct Session<P> {
    payload: Rc<P>,
    flags: HashMap<Token, Flags>,
}

struct Inner<P, E> {
    callbacks: BTreeMap<Token, Callback<P, E>>,
    last_id: u64,
    session: Option<Session<P>>,
}

/// Broadcasts payloads to registered callbacks.
///
/// Unlike a topic-based pub/sub, callbacks are not subscribed to particular
/// payloads: every payload goes to every callback. A callback can require
/// that other callbacks finish with the current payload before it continues
/// by calling [`wait_for`](Dispatcher::wait_for).
///
/// `E` is the error type callbacks return. Protocol errors convert into it,
/// so a failure deep inside nested `wait_for` calls reaches the outermost
/// `dispatch` caller unchanged.
pub struct Dispatcher<P, E = DispatchError> {
    inner: RefCell<Inner<P, E>>,
}

impl<P, E> Default for Dispatcher<P, E>
where
    E: From<DispatchError>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<P, E> fmt::Debug for Dispatcher<P, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Dispatcher")
            .field("callbacks", &inner.callbacks.len())
            .field("last_id", &inner.last_id)
            .field("dispatching", &inner.session.is_some())
            .finish()
    }
}

impl<P, E> Dispatcher<P, E>
where
    E: From<DispatchError>,
{
    pub fn new() -> Self {
        Self {
            inner: RefCell::new(Inner {
                callbacks: BTreeMap::new(),
                last_id: 0,
                session: None,
            }),
        }
    }

    /// Register a callback to be invoked with every dispatched payload.
    /// Returns a token usable with `wait_for` and `unregister`.
    pub fn register<F>(&self, callback: F) -> Token
    where
        F: Fn(&P) -> Result<(), E> + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        inner.last_id += 1;
        let token = Token(inner.last_id);
        inner.callbacks.insert(token, Rc::new(callback));
        trace!(%token, "callback registered");
        token
    }

    /// Remove a callback by token.
    pub fn unregister(&self, token: Token) -> Result<(), DispatchError> {
        // The removed closure is dropped after the borrow is released.
        let removed = self.inner.borrow_mut().callbacks.remove(&token);
        match removed {
            Some(_) => {
                trace!(%token, "callback unregistered");
                Ok(())
            }
            None => Err(DispatchError::UnknownToken(token)),
        }
    }

    pub fn is_registered(&self, token: Token) -> bool {
        self.inner.borrow().callbacks.contains_key(&token)
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.inner.borrow().callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True exactly while a dispatch session is open.
    pub fn is_dispatching(&self) -> bool {
        self.inner.borrow().session.is_some()
    }

    /// Dispatch a payload to all registered callbacks.
    ///
    /// The session is closed on every exit path, so a failed dispatch leaves
    /// the dispatcher ready for the next one.
    pub fn dispatch(&self, payload: P) -> Result<(), E> {
        let order: Vec<Token> = {
            let mut inner = self.inner.borrow_mut();
            if inner.session.is_some() {
                return Err(DispatchError::ReentrantDispatch.into());
            }
            let flags = inner
                .callbacks
                .keys()
                .map(|token| (*token, Flags::default()))
                .collect();
            inner.session = Some(Session {
                payload: Rc::new(payload),
                flags,
            });
            inner.callbacks.keys().copied().collect()
        };

        debug!(callbacks = order.len(), "dispatch started");
        let _session = SessionGuard { inner: &self.inner };

        for token in order {
            // Already reached through wait_for, or unregistered mid-session.
            if self.flags(token).pending || !self.is_registered(token) {
                continue;
            }
            self.invoke(token)?;
        }

        Ok(())
    }

    /// Wait for the callbacks behind `tokens` to finish with the current
    /// payload before continuing. Only valid from inside a callback.
    pub fn wait_for(&self, tokens: &[Token]) -> Result<(), E> {
        if !self.is_dispatching() {
            return Err(DispatchError::NotDispatching.into());
        }

        for &token in tokens {
            let flags = self.flags(token);
            if flags.pending {
                if !flags.handled {
                    return Err(DispatchError::CircularDependency(token).into());
                }
                continue;
            }
            if !self.is_registered(token) {
                return Err(DispatchError::UnknownToken(token).into());
            }
            self.invoke(token)?;
        }

        Ok(())
    }

    fn flags(&self, token: Token) -> Flags {
        self.inner
            .borrow()
            .session
            .as_ref()
            .and_then(|session| session.flags.get(&token).copied())
            .unwrap_or_default()
    }

    /// Pending before the call, handled after it. A token that is pending but
    /// not handled is on the current call stack.
    fn invoke(&self, token: Token) -> Result<(), E> {
        let (callback, payload) = {
            let mut inner = self.inner.borrow_mut();
            let Some(callback) = inner.callbacks.get(&token).cloned() else {
                return Err(DispatchError::UnknownToken(token).into());
            };
            let Some(session) = inner.session.as_mut() else {
                return Err(DispatchError::NotDispatching.into());
            };
            session.flags.entry(token).or_default().pending = true;
            (callback, Rc::clone(&session.payload))
        };

        trace!(%token, "invoking callback");
        callback(&payload)?;

        if let Some(session) = self.inner.borrow_mut().session.as_mut() {
            session.flags.entry(token).or_default().handled = true;
        }
        Ok(())
    }
}

/// Closes the session when `dispatch` returns, errors, or unwinds.
struct SessionGuard<'a, P, E> {
    inner: &'a RefCell<Inner<P, E>>,
}

impl<P, E> Drop for SessionGuard<'_, P, E> {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.try_borrow_mut() {
            let session = inner.session.take();
            drop(inner);
            drop(session);
        }
        debug!("dispatch finished");
    }
}
