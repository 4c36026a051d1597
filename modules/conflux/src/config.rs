use std::env;
use std::fmt;
use std::rc::Rc;

use tracing::warn;

use crate::codec::{JsonCodec, StateCodec};
use crate::error::FluxResult;
use crate::store::StateStrategy;

/// Wraps every top-level dispatch. Lets a host group the change
/// notifications a dispatch produces.
pub trait Batching {
    fn batch(&self, run: &mut dyn FnMut() -> FluxResult<()>) -> FluxResult<()>;
}

/// Runs the dispatch immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct Immediate;

impl Batching for Immediate {
    fn batch(&self, run: &mut dyn FnMut() -> FluxResult<()>) -> FluxResult<()> {
        run()
    }
}

/// Context configuration.
#[derive(Clone)]
pub struct FluxConfig {
    pub codec: Rc<dyn StateCodec>,
    pub batching: Rc<dyn Batching>,
    /// Used by stores whose model declares no strategy.
    pub default_strategy: StateStrategy,
}

impl fmt::Debug for FluxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FluxConfig")
            .field("codec", &self.codec.name())
            .field("default_strategy", &self.default_strategy)
            .finish_non_exhaustive()
    }
}

impl Default for FluxConfig {
    fn default() -> Self {
        Self {
            codec: Rc::new(JsonCodec),
            batching: Rc::new(Immediate),
            default_strategy: StateStrategy::default(),
        }
    }
}

impl FluxConfig {
    /// Defaults, overridden from the environment:
    /// - `CONFLUX_STATE_STRATEGY`: `copy` or `replace`
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = env::var("CONFLUX_STATE_STRATEGY") {
            match raw.parse() {
                Ok(strategy) => config.default_strategy = strategy,
                Err(err) => warn!(error = %err, "ignoring CONFLUX_STATE_STRATEGY"),
            }
        }
        config
    }

    pub fn with_codec(mut self, codec: impl StateCodec + 'static) -> Self {
        self.codec = Rc::new(codec);
        self
    }

    pub fn with_batching(mut self, batching: impl Batching + 'static) -> Self {
        self.batching = Rc::new(batching);
        self
    }

    pub fn with_default_strategy(mut self, strategy: StateStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    pub fn log_summary(&self) {
        tracing::info!("Flux config loaded:");
        tracing::info!("  codec: {}", self.codec.name());
        tracing::info!("  default state strategy: {}", self.default_strategy);
    }
}
