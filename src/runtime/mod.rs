//! Actor system configuration and construction.
//!
//! - [`config`]: configuration values and their defaults
//! - [`env_config`]: `ACTORCORE_*` environment overrides
//! - [`builder`]: [`ActorSystemBuilder`] and the [`ActorSystem`] handle
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//! use actorcore::runtime::ActorSystem;
//!
//! let system = ActorSystem::builder()
//!     .call_timeout(Some(Duration::from_secs(1)))
//!     .build();
//! let echo = system
//!     .actor::<String>()
//!     .name("echo")
//!     .spawn(|ctx| loop {
//!         let msg = ctx.receive()?;
//!         println!("echo: {msg}");
//!     })
//!     .unwrap();
//! echo.send("hello".to_string()).unwrap();
//! for actor in system.shutdown() {
//!     actor.join_timeout(None).unwrap();
//! }
//! ```
//!
//! # Configuration Precedence
//!
//! Builder methods override `ACTORCORE_*` variables read by
//! [`ActorSystemBuilder::from_env`], which override the defaults.

pub mod builder;
pub mod config;
pub mod env_config;

pub use builder::{ActorSystem, ActorSystemBuilder};
pub use config::ActorSystemConfig;
pub use env_config::ConfigError;
