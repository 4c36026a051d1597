//! Protocol errors raised by the dispatcher itself.

use thiserror::Error;

use crate::dispatcher::Token;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Token is not (or no longer) mapped to a callback.
    #[error("`{0}` does not map to a registered callback")]
    UnknownToken(Token),

    #[error("cannot dispatch in the middle of a dispatch")]
    ReentrantDispatch,

    #[error("wait_for must be invoked while dispatching")]
    NotDispatching,

    /// A callback waited, directly or transitively, on itself.
    #[error("circular dependency detected while waiting for `{0}`")]
    CircularDependency(Token),
}
