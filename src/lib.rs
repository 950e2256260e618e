//! Actorcore: an in-process actor runtime with Erlang-style behaviours.
//!
//! # Overview
//!
//! Every actor runs on its own strand and owns a mailbox. Actors share no
//! state; they talk through messages, observe each other's deaths through
//! links and watches, and are kept alive by supervisors.
//!
//! # Core Guarantees
//!
//! - **FIFO per sender**: messages from one sender are received in send order,
//!   including after selective receives have skipped some of them
//! - **At most once per receive**: a receive never returns the same queued
//!   message twice, and an accepted message is removed exactly once
//! - **Death is never silent**: every linked or watching actor gets exactly
//!   one exit notification
//! - **Call correlation**: replies are matched to their call by id and never
//!   cross between concurrent callers
//! - **Bounded restarts**: a child restarted too often fails its supervisor
//!   instead of respawning forever
//!
//! # Module Structure
//!
//! - [`queue`]: lock-free single-consumer queues (array and linked-array)
//! - [`strand`]: the thread-backed execution unit actors run on
//! - [`mailbox`]: bounded or unbounded mailbox with overflow policies
//! - [`actor`]: actors, lifecycle (links, watches, shutdown), registry,
//!   selective receive
//! - [`request_reply`]: call/cast over plain messages
//! - [`gen_server`], [`gen_event`], [`supervision`]: behaviours
//! - [`fsm`], [`proxy_server`]: state machines and proxied objects
//! - [`sync`]: stamped read/write lock
//! - [`runtime`]: configuration and the [`ActorSystem`](runtime::ActorSystem)
//! - [`error`]: error types
//!
//! # Example
//!
//! ```
//! use actorcore::actor::ActorBuilder;
//! use actorcore::request_reply::{call, CallerRef};
//!
//! enum Msg {
//!     Add(u64, CallerRef),
//! }
//!
//! let adder = ActorBuilder::<Msg>::new()
//!     .spawn(|ctx| {
//!         let mut total = 0;
//!         loop {
//!             let Msg::Add(n, from) = ctx.receive()?;
//!             total += n;
//!             from.reply(total);
//!         }
//!     })
//!     .unwrap();
//!
//! let total: u64 = call(&adder, |from| Msg::Add(2, from), None).unwrap();
//! assert_eq!(total, 2);
//! adder.shutdown();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

pub mod actor;
pub mod error;
pub mod fsm;
pub mod gen_event;
pub mod gen_server;
pub mod mailbox;
pub mod proxy_server;
pub mod queue;
pub mod request_reply;
pub mod runtime;
pub mod strand;
pub mod supervision;
pub mod sync;
pub mod test_utils;

// Re-exports for convenient access to core types
pub use actor::{ActorBuilder, ActorContext, ActorId, ActorRef, AnyActorRef, ExitReason};
pub use error::{Error, ErrorKind, Result, ResultExt};
pub use runtime::{ActorSystem, ActorSystemBuilder, ActorSystemConfig};
