use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use crate::error::FluxError;

/// How a store hands its state to readers. Declared per store.
///
/// Writes always install a fresh value; the strategy only decides whether
/// readers share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StateStrategy {
    /// Readers get a detached shallow copy on every read. For structured
    /// state a caller might otherwise treat as its own.
    #[default]
    Copy,
    /// Readers share the stored value. For opaque or immutable state.
    Replace,
}

impl StateStrategy {
    pub(crate) fn read<S: Clone>(self, state: &Rc<S>) -> Rc<S> {
        match self {
            StateStrategy::Copy => Rc::new(S::clone(state)),
            StateStrategy::Replace => Rc::clone(state),
        }
    }
}

impl fmt::Display for StateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateStrategy::Copy => f.write_str("copy"),
            StateStrategy::Replace => f.write_str("replace"),
        }
    }
}

impl FromStr for StateStrategy {
    type Err = FluxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "copy" => Ok(StateStrategy::Copy),
            "replace" => Ok(StateStrategy::Replace),
            other => Err(FluxError::Config(format!(
                "unknown state strategy `{other}` (expected `copy` or `replace`)"
            ))),
        }
    }
}
