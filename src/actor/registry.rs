//! Name registry.
//!
//! A [`Registry`] maps names to live actors. It is owned by an
//! [`ActorSystem`](crate::runtime::ActorSystem) and passed explicitly to the
//! actors it spawns; there is no process-global table. A name held by a dead
//! actor is free: registering it again replaces the stale entry, and lookups
//! never return dead actors.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::actor::{ActorId, ActorRef, AnyActorRef};
use crate::error::{Error, ErrorKind, Result};

/// Shared name → actor table. Cheap to clone.
#[derive(Clone, Default)]
pub struct Registry {
    entries: Arc<RwLock<HashMap<String, AnyActorRef>>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to `actor`.
    ///
    /// Fails with `NameTaken` if a different live actor holds the name.
    pub fn register(&self, name: &str, actor: AnyActorRef) -> Result<()> {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(name) {
            if existing.id() != actor.id() && existing.is_alive() {
                return Err(Error::new(ErrorKind::NameTaken)
                    .with_message(format!("{name} is held by {}", existing.id())));
            }
        }
        tracing::debug!(name = %name, actor = %actor.id(), "registered actor");
        entries.insert(name.to_string(), actor);
        Ok(())
    }

    /// Removes `name` if it is still bound to `owner`.
    pub fn unregister(&self, name: &str, owner: ActorId) -> bool {
        let mut entries = self.entries.write();
        if entries.get(name).is_some_and(|a| a.id() == owner) {
            entries.remove(name);
            tracing::debug!(name = %name, actor = %owner, "unregistered actor");
            true
        } else {
            false
        }
    }

    /// The live actor registered under `name`.
    #[must_use]
    pub fn lookup_any(&self, name: &str) -> Option<AnyActorRef> {
        self.entries
            .read()
            .get(name)
            .filter(|a| a.is_alive())
            .cloned()
    }

    /// The live actor registered under `name`, typed by its message.
    ///
    /// Returns `None` if the name is free or the actor takes another type.
    #[must_use]
    pub fn lookup<M: Send + Sync + 'static>(&self, name: &str) -> Option<ActorRef<M>> {
        self.lookup_any(name)?.downcast()
    }

    /// Like [`lookup`](Self::lookup) but reports a missing name as an error.
    pub fn get<M: Send + Sync + 'static>(&self, name: &str) -> Result<ActorRef<M>> {
        self.lookup(name).ok_or_else(|| {
            Error::new(ErrorKind::NoSuchActor).with_message(name.to_string())
        })
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of entries, including stale ones not yet replaced.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True if no name is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Removes every entry and returns the actors that were still alive.
    pub fn clear(&self) -> Vec<AnyActorRef> {
        let drained: Vec<AnyActorRef> = self.entries.write().drain().map(|(_, a)| a).collect();
        drained.into_iter().filter(AnyActorRef::is_alive).collect()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("names", &self.names())
            .finish()
    }
}
