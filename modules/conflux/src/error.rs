use conflux_dispatcher::DispatchError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FluxError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Something other than an action issued by this context was supplied
    /// where one is required.
    #[error("{role} handler must be an action issued by this context")]
    HandlerType { role: &'static str },

    #[error("multiple action handlers bound to `{action}`: {first} and {second}")]
    DuplicateBinding {
        action: String,
        first: String,
        second: String,
    },

    #[error("`{name}` defined but does not exist in {store}")]
    UnknownListener { name: String, store: String },

    #[error("dispatch tokens not provided")]
    MissingDependencies,

    #[error("cannot set state of `{store}` while another dispatch is in progress")]
    SetStateDuringDispatch { store: String },

    #[error("{0} is not a valid store")]
    InvalidStore(String),

    #[error("store provided does not have a name")]
    MissingStoreName,

    #[error("no async method named `{0}`")]
    UnknownMethod(String),

    #[error("the owning context has been dropped")]
    ContextDropped,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A user handler, reducer or remote call failed.
    #[error(transparent)]
    Handler(anyhow::Error),
}

/// Handlers return `anyhow::Result`; a `FluxError` raised inside one (for
/// example a circular `wait_for`) keeps its variant on the way back out.
impl From<anyhow::Error> for FluxError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<FluxError>() {
            Ok(flux) => flux,
            Err(err) => FluxError::Handler(err),
        }
    }
}

pub type FluxResult<T> = std::result::Result<T, FluxError>;
