//! Actor system builder and handle.

use std::sync::Arc;
use std::time::Duration;

use crate::actor::{ActorBuilder, ActorRef, AnyActorRef, Registry};
use crate::error::Result;
use crate::fsm::{spawn_fsm, Transition};
use crate::gen_event::{spawn_gen_event, EventMessage, GenEventRef, Initializer};
use crate::gen_server::{spawn_gen_server, GenServer, GenServerRef, ServerMessage};
use crate::mailbox::OverflowPolicy;
use crate::proxy_server::{spawn_proxy, ProxyRef};
use crate::runtime::config::ActorSystemConfig;
use crate::runtime::env_config::apply_env_overrides;
use crate::supervision::{RestartStrategy, SupervisorBuilder};
use crate::sync::StampedLock;

/// Builder for constructing an actor system with custom configuration.
#[derive(Debug, Clone, Default)]
pub struct ActorSystemBuilder {
    config: ActorSystemConfig,
}

impl ActorSystemBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the defaults overridden by `ACTORCORE_*` variables.
    ///
    /// Builder methods called afterwards take precedence over the
    /// environment.
    pub fn from_env() -> Result<Self> {
        let mut config = ActorSystemConfig::default();
        apply_env_overrides(&mut config)?;
        Ok(Self { config })
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: ActorSystemConfig) -> Self {
        self.config = config;
        self
    }

    /// Default mailbox capacity (`None` = unbounded).
    #[must_use]
    pub fn mailbox_capacity(mut self, capacity: Option<usize>) -> Self {
        self.config.default_mailbox_capacity = capacity;
        self
    }

    /// Default overflow policy for bounded mailboxes.
    #[must_use]
    pub fn overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.config.overflow_policy = policy;
        self
    }

    /// Default timeout for calls that give none.
    #[must_use]
    pub fn call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.default_call_timeout = timeout;
        self
    }

    /// How long supervisors wait for a child to stop.
    #[must_use]
    pub fn shutdown_deadline(mut self, deadline: Duration) -> Self {
        self.config.default_shutdown_deadline = deadline;
        self
    }

    /// Set the actor thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Set the actor thread stack size.
    #[must_use]
    pub fn thread_stack_size(mut self, size: usize) -> Self {
        self.config.thread_stack_size = Some(size);
        self
    }

    /// Spin budget of locks created through the system.
    #[must_use]
    pub fn lock_spins(mut self, spins: u32) -> Self {
        self.config.lock_spins = spins;
        self
    }

    /// Build an actor system from this configuration.
    #[must_use]
    pub fn build(self) -> ActorSystem {
        ActorSystem::with_config(self.config)
    }
}

/// A configuration plus the name registry shared by the actors it spawns.
///
/// Cloning yields another handle to the same system.
#[derive(Clone)]
pub struct ActorSystem {
    inner: Arc<SystemInner>,
}

struct SystemInner {
    config: ActorSystemConfig,
    registry: Registry,
}

impl ActorSystem {
    /// A system with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ActorSystemConfig::default())
    }

    /// Shorthand for [`ActorSystemBuilder::new`].
    #[must_use]
    pub fn builder() -> ActorSystemBuilder {
        ActorSystemBuilder::new()
    }

    /// Construct a system from the given configuration.
    #[must_use]
    pub fn with_config(mut config: ActorSystemConfig) -> Self {
        config.normalize();
        tracing::debug!(?config, "actor system created");
        Self {
            inner: Arc::new(SystemInner {
                config,
                registry: Registry::new(),
            }),
        }
    }

    /// Returns a reference to the system configuration.
    #[must_use]
    pub fn config(&self) -> &ActorSystemConfig {
        &self.inner.config
    }

    /// The name registry of this system.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// An actor builder preset with this system's defaults and registry.
    #[must_use]
    pub fn actor<M: Send + Sync + 'static>(&self) -> ActorBuilder<M> {
        ActorBuilder::from_config(&self.inner.config, Some(self.inner.registry.clone()))
    }

    /// Spawns a gen server with this system's defaults.
    pub fn spawn_gen_server<S: GenServer>(&self, server: S) -> Result<GenServerRef<S>> {
        spawn_gen_server(self.actor::<ServerMessage<S>>(), server)
    }

    /// Spawns an event actor with this system's defaults.
    pub fn spawn_gen_event<E: Send + Sync + 'static>(
        &self,
        initializer: Option<Box<dyn Initializer>>,
    ) -> Result<GenEventRef<E>> {
        spawn_gen_event(self.actor::<EventMessage<E>>(), initializer)
    }

    /// Spawns a state machine with this system's defaults.
    pub fn spawn_fsm<M: Send + Sync + 'static>(
        &self,
        initializer: Option<Box<dyn Initializer>>,
        initial: Transition<M>,
    ) -> Result<ActorRef<M>> {
        spawn_fsm(self.actor::<M>(), initializer, initial)
    }

    /// Spawns a proxy owning `target` with this system's defaults.
    pub fn spawn_proxy<T: Send + 'static>(&self, target: T, call_on_void: bool) -> Result<ProxyRef<T>> {
        spawn_proxy(self.actor(), target, call_on_void)
    }

    /// A supervisor builder preset with this system's defaults and registry.
    #[must_use]
    pub fn supervisor(&self, strategy: RestartStrategy) -> SupervisorBuilder {
        SupervisorBuilder::from_config(
            strategy,
            &self.inner.config,
            Some(self.inner.registry.clone()),
        )
    }

    /// A stamped lock using this system's spin budget.
    #[must_use]
    pub fn stamped_lock(&self) -> StampedLock {
        StampedLock::with_spins(self.inner.config.lock_spins)
    }

    /// Asks every registered actor to shut down and empties the registry.
    ///
    /// Returns the actors that were asked, so callers can join them.
    pub fn shutdown(&self) -> Vec<AnyActorRef> {
        let actors = self.inner.registry.clear();
        tracing::info!(actors = actors.len(), "actor system shutting down");
        for actor in &actors {
            actor.shutdown();
        }
        actors
    }
}

impl Default for ActorSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ActorSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorSystem")
            .field("config", &self.inner.config)
            .field("registered", &self.inner.registry.len())
            .finish()
    }
}
