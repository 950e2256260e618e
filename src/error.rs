//! Error types and error handling strategy for the actor runtime.
//!
//! Errors are explicit values. Which callback an error escapes from decides
//! whether it is fatal, not the error's type:
//!
//! - an error returned from `handle_call` becomes an error *response* and the
//!   server keeps running;
//! - an error returned from `handle_cast`, `handle_info` or an actor body
//!   terminates the actor and is fanned out to every linked or watching actor.
//!
//! # Error Categories
//!
//! - **Mailbox**: capacity exceeded on a bounded mailbox
//! - **Lifecycle**: exit signals from linked actors, shutdown requests, interrupts
//! - **Request**: failed calls, callee death, timeouts
//! - **Registry**: name collisions and lookups
//! - **Supervision**: child management and restart storms
//! - **Locking**: stamped lock misuse
//! - **Internal**: runtime bugs and invalid states

use core::fmt;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Mailbox ===
    /// A bounded mailbox (or queue) is full.
    CapacityExceeded,

    // === Lifecycle ===
    /// The blocked strand was interrupted.
    Interrupted,
    /// An exit signal arrived from a linked actor.
    Lifecycle,
    /// An orderly shutdown was requested.
    Shutdown,
    /// The strand or actor was already started.
    AlreadyStarted,
    /// The operation must be called from inside the owning actor.
    NotInActor,

    // === Request ===
    /// An explicit deadline elapsed.
    Timeout,
    /// The callee replied with an error.
    RequestFailed,
    /// The callee died before replying.
    ActorDied,

    // === Registry ===
    /// No actor is registered under the requested name.
    NoSuchActor,
    /// The name is already held by a live actor.
    NameTaken,

    // === Supervision ===
    /// Supervisor bookkeeping failed (duplicate child, unknown child).
    Supervisor,
    /// A child was restarted too often inside its window.
    RestartLimitExceeded,

    // === Locking ===
    /// A stamp did not match the lock state on release or conversion.
    IllegalLockState,

    // === Configuration ===
    /// A configuration value could not be used.
    InvalidConfig,

    // === Internal ===
    /// Internal runtime error (bug).
    Internal,

    // === User ===
    /// User-provided error.
    User,
}

impl ErrorKind {
    /// Returns the coarse category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::CapacityExceeded => ErrorCategory::Mailbox,
            Self::Interrupted
            | Self::Lifecycle
            | Self::Shutdown
            | Self::AlreadyStarted
            | Self::NotInActor => ErrorCategory::Lifecycle,
            Self::Timeout | Self::RequestFailed | Self::ActorDied => ErrorCategory::Request,
            Self::NoSuchActor | Self::NameTaken => ErrorCategory::Registry,
            Self::Supervisor | Self::RestartLimitExceeded => ErrorCategory::Supervision,
            Self::IllegalLockState => ErrorCategory::Locking,
            Self::InvalidConfig => ErrorCategory::Configuration,
            Self::Internal => ErrorCategory::Internal,
            Self::User => ErrorCategory::User,
        }
    }

    /// Returns true if retrying the same operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::CapacityExceeded | Self::Timeout)
    }
}

/// Coarse error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Mailbox capacity.
    Mailbox,
    /// Actor lifecycle and interruption.
    Lifecycle,
    /// Request/reply.
    Request,
    /// Name registry.
    Registry,
    /// Supervision.
    Supervision,
    /// Stamped lock.
    Locking,
    /// Configuration.
    Configuration,
    /// Runtime bug.
    Internal,
    /// Application error.
    User,
}

/// The main error type for runtime operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns true if this error is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// Returns true if this error reports an interrupted wait.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self.kind, ErrorKind::Interrupted)
    }

    /// Returns true if this error carries an orderly shutdown request.
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self.kind, ErrorKind::Shutdown)
    }

    /// Returns true if retrying may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Creates an application error with a message.
    #[must_use]
    pub fn user(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_message(msg)
    }

    /// Creates an interruption error.
    #[must_use]
    pub const fn interrupted() -> Self {
        Self::new(ErrorKind::Interrupted)
    }

    /// Creates a timeout error.
    #[must_use]
    pub const fn timeout() -> Self {
        Self::new(ErrorKind::Timeout)
    }

    /// Creates a shutdown error.
    #[must_use]
    pub const fn shutdown() -> Self {
        Self::new(ErrorKind::Shutdown)
    }

    /// Creates a capacity-exceeded error.
    #[must_use]
    pub const fn capacity_exceeded() -> Self {
        Self::new(ErrorKind::CapacityExceeded)
    }

    /// Creates an error describing an illegal stamped-lock release.
    #[must_use]
    pub fn illegal_lock_state(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::IllegalLockState).with_message(detail)
    }

    /// Creates a supervisor error.
    #[must_use]
    pub fn supervisor(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Supervisor).with_message(detail)
    }

    /// Creates an internal error for runtime bugs.
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(detail)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // User errors read as their message so callers can match on it.
        match (&self.kind, &self.message) {
            (ErrorKind::User | ErrorKind::RequestFailed, Some(msg)) => write!(f, "{msg}"),
            (kind, Some(msg)) => write!(f, "{kind:?}: {msg}"),
            (kind, None) => write!(f, "{kind:?}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<crate::runtime::ConfigError> for Error {
    fn from(e: crate::runtime::ConfigError) -> Self {
        Self::new(ErrorKind::InvalidConfig)
            .with_message(e.to_string())
            .with_source(e)
    }
}

/// A specialized Result type for runtime operations.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Extension trait for attaching context to results.
pub trait ResultExt<T> {
    /// Attaches a message to the error, keeping its kind.
    fn context(self, msg: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let e = e.into();
            let msg = msg.into();
            let merged = match e.message() {
                Some(inner) => format!("{msg}: {inner}"),
                None => msg,
            };
            e.with_message(merged)
        })
    }
}
