//! Ordered broadcast dispatcher.
//!
//! Every dispatched payload reaches every registered callback, in
//! registration order. A callback may defer itself behind other callbacks for
//! the same payload with `wait_for`, which runs them first (depth-first) and
//! rejects dependency cycles.
//!
//! Single-threaded by construction: callbacks are `Rc<dyn Fn>` and the
//! dispatcher uses interior mutability so callbacks can re-enter it.

pub mod dispatcher;
pub mod error;

pub use dispatcher::{Callback, Dispatcher, Token};
pub use error::DispatchError;
