//! Error types for the deferred promise library

use crate::value::Value;
use thiserror::Error;

/// Main error type for the promise library
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Malformed constructor or call argument
    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),

    /// Double settle to a different outcome, or settle with itself
    #[error("LogicError: {0}")]
    Logic(String),

    /// A rejection reason that is not itself an error, made raisable
    #[error("{message}")]
    Rejection {
        message: String,
        /// The original rejection reason, preserved for inspection
        reason: Value,
    },

    /// A pending promise was cancelled without the cancel function settling it
    #[error("CancellationError: {0}")]
    Cancellation(String),

    /// Fewer fulfillments than requested before the source ran out
    #[error("AggregateError: {message}")]
    Aggregate {
        message: String,
        /// Every rejection reason collected along the way, in arrival order
        reasons: Vec<Value>,
    },

    /// Error raised by user code (callbacks, wait functions, routines)
    #[error("Error: {0}")]
    Failure(String),
}

impl Error {
    /// Create a logic error
    pub fn logic(message: impl Into<String>) -> Self {
        Error::Logic(message.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    /// Create a failure raised by user code
    pub fn failure(message: impl Into<String>) -> Self {
        Error::Failure(message.into())
    }

    /// Create a cancellation error with the standard message
    pub fn cancelled() -> Self {
        Error::Cancellation(messages::CANCELLED.to_string())
    }

    /// Wrap a non-error rejection reason.
    ///
    /// The message embeds a rendering of the reason: strings verbatim, other
    /// values as JSON.
    pub fn rejection(reason: Value) -> Self {
        let message = match &reason {
            Value::String(s) => format!("{} with reason: {}", messages::REJECTED, s),
            Value::Null => messages::REJECTED.to_string(),
            other => format!("{} with reason: {}", messages::REJECTED, other.to_json()),
        };
        Error::Rejection { message, reason }
    }

    /// Create an aggregate error from the collected rejection reasons
    pub fn aggregate(message: impl Into<String>, reasons: Vec<Value>) -> Self {
        Error::Aggregate {
            message: message.into(),
            reasons,
        }
    }

    /// The original reason carried by a [`Error::Rejection`]
    pub fn reason(&self) -> Option<&Value> {
        match self {
            Error::Rejection { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// The reasons carried by an [`Error::Aggregate`]
    pub fn reasons(&self) -> &[Value] {
        match self {
            Error::Aggregate { reasons, .. } => reasons,
            _ => &[],
        }
    }

    /// Check if this is a cancellation
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancellation(_))
    }
}

/// Result type alias for the promise library
pub type Result<T> = std::result::Result<T, Error>;

/// Standard error message templates
pub mod messages {
    pub const REJECTED: &str = "The promise was rejected";
    pub const CANCELLED: &str = "Promise has been cancelled";
    pub const SETTLE_WITH_SELF: &str = "Cannot fulfill or reject a promise with itself";
    pub const NO_WAIT_STRATEGY: &str = "Cannot wait on a promise that has no internal wait function. \
         You must provide a wait function when constructing the promise to be able to wait on a promise.";
    pub const WAIT_DID_NOT_RESOLVE: &str = "Invoking the wait callback did not resolve the promise";
    pub const NOT_ENOUGH_FULFILLED: &str = "Not enough promises to fulfill count";
    pub const FULFILLED_WITH_THENABLE: &str = "You cannot create a fulfilled promise with a promise.";
    pub const REJECTED_WITH_THENABLE: &str = "You cannot create a rejected promise with a promise.";

    /// Format "The promise is already X."
    pub fn already(state: &str) -> String {
        format!("The promise is already {}.", state)
    }

    /// Format "Cannot change a X promise to Y"
    pub fn cannot_change(from: &str, to: &str) -> String {
        format!("Cannot change a {} promise to {}", from, to)
    }
}
