//! Links, watches and death notification.
//!
//! Every actor keeps a list of lifecycle listeners. When it dies, each
//! listener turns into exactly one [`ExitMessage`] delivered to the
//! interested actor:
//!
//! - a **link** is symmetric: `a.link(b)` installs a listener on both sides,
//!   and the notification carries no watch. By default a linked actor's exit
//!   surfaces from the survivor's next receive as a `Lifecycle` error.
//! - a **watch** is one-way: the watcher gets a notification tagged with the
//!   [`WatchRef`] returned when the watch was established, and by default the
//!   notification is only logged.
//!
//! Adding a listener to an actor that is already dead fires it immediately,
//! so a watch established after the fact is never silent.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::actor::{ActorId, AnyActorRef};
use crate::error::Error;

/// Monotonic counter for generating unique [`WatchRef`] values.
static WATCH_COUNTER: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// WatchRef
// ============================================================================

/// Opaque handle of an established watch.
///
/// Unique for the lifetime of the process. Request/reply reuses it as the
/// correlation id of a call, which is why two concurrent callers can never
/// receive each other's responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatchRef(u64);

impl WatchRef {
    /// Allocates a fresh, globally unique watch reference.
    pub(crate) fn new() -> Self {
        Self(WATCH_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying numeric identifier.
    #[must_use]
    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WatchRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WatchRef({})", self.0)
    }
}

// ============================================================================
// ExitReason
// ============================================================================

/// Why an actor terminated.
#[derive(Debug, Clone)]
pub enum ExitReason {
    /// The body returned successfully or an orderly shutdown completed.
    Normal,
    /// The body failed.
    Failed(Error),
}

impl ExitReason {
    /// Returns `true` for a normal exit.
    #[must_use]
    pub const fn is_normal(&self) -> bool {
        matches!(self, Self::Normal)
    }

    /// The failure, if any.
    #[must_use]
    pub const fn error(&self) -> Option<&Error> {
        match self {
            Self::Normal => None,
            Self::Failed(e) => Some(e),
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

// ============================================================================
// Lifecycle messages
// ============================================================================

/// Notification that a linked or watched actor died.
#[derive(Debug, Clone)]
pub struct ExitMessage {
    /// The actor that died.
    pub actor: AnyActorRef,
    /// How it died.
    pub reason: ExitReason,
    /// The watch this notification answers; `None` for links.
    pub watch: Option<WatchRef>,
}

impl ExitMessage {
    /// True if this notification comes from a link rather than a watch.
    #[must_use]
    pub const fn is_link(&self) -> bool {
        self.watch.is_none()
    }
}

/// Request for an orderly shutdown.
#[derive(Debug, Clone, Default)]
pub struct ShutdownMessage {
    /// Who asked, if anyone.
    pub requester: Option<AnyActorRef>,
}

/// Control messages intercepted by the runtime before user code sees them.
#[derive(Debug, Clone)]
pub enum LifecycleMessage {
    /// A linked or watched actor died.
    Exit(ExitMessage),
    /// Stop gracefully.
    Shutdown(ShutdownMessage),
}

// ============================================================================
// Listeners
// ============================================================================

/// A subscription to another actor's death.
#[derive(Debug, Clone)]
pub(crate) enum LifecycleListener {
    /// One side of a link: notifies `peer` without a watch.
    Link { peer: AnyActorRef },
    /// A watch: notifies `watcher` with `watch`.
    Watch { watcher: AnyActorRef, watch: WatchRef },
}

impl LifecycleListener {
    /// The actor this listener notifies.
    pub(crate) fn observer(&self) -> ActorId {
        match self {
            Self::Link { peer } => peer.id(),
            Self::Watch { watcher, .. } => watcher.id(),
        }
    }

    pub(crate) fn is_link_to(&self, peer_id: ActorId) -> bool {
        matches!(self, Self::Link { peer } if peer.id() == peer_id)
    }

    pub(crate) fn is_watch(&self, watch_ref: WatchRef) -> bool {
        matches!(self, Self::Watch { watch, .. } if *watch == watch_ref)
    }

    /// Delivers the exit notification for `actor` dying with `reason`.
    pub(crate) fn dead(&self, actor: &AnyActorRef, reason: &ExitReason) {
        let (target, watch) = match self {
            Self::Link { peer } => (peer, None),
            Self::Watch { watcher, watch } => (watcher, Some(*watch)),
        };
        tracing::debug!(
            actor = %actor.id(),
            observer = %target.id(),
            watch = ?watch,
            reason = %reason,
            "delivering exit notification"
        );
        target.deliver_lifecycle(LifecycleMessage::Exit(ExitMessage {
            actor: actor.clone(),
            reason: reason.clone(),
            watch,
        }));
    }
}
