//! Environment variable support for [`ActorSystemBuilder`](super::ActorSystemBuilder).
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via builder methods (`call_timeout(..)`)
//! 2. **Environment variables**: values from `ACTORCORE_*` env vars
//! 3. **Defaults**: built-in defaults from [`ActorSystemConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `ACTORCORE_MAILBOX_CAPACITY` | `usize` (0 = unbounded) | `default_mailbox_capacity` |
//! | `ACTORCORE_OVERFLOW_POLICY` | `throw\|drop\|block\|backoff\|interrupt` | `overflow_policy` |
//! | `ACTORCORE_CALL_TIMEOUT_MS` | `u64` (0 = none) | `default_call_timeout` |
//! | `ACTORCORE_SHUTDOWN_DEADLINE_MS` | `u64` | `default_shutdown_deadline` |
//! | `ACTORCORE_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |
//! | `ACTORCORE_THREAD_STACK_SIZE` | `usize` | `thread_stack_size` |
//! | `ACTORCORE_LOCK_SPINS` | `u32` | `lock_spins` |

use std::time::Duration;

use crate::mailbox::OverflowPolicy;
use crate::runtime::config::ActorSystemConfig;

/// Environment variable name for the default mailbox capacity.
pub const ENV_MAILBOX_CAPACITY: &str = "ACTORCORE_MAILBOX_CAPACITY";
/// Environment variable name for the mailbox overflow policy.
pub const ENV_OVERFLOW_POLICY: &str = "ACTORCORE_OVERFLOW_POLICY";
/// Environment variable name for the default call timeout in milliseconds.
pub const ENV_CALL_TIMEOUT_MS: &str = "ACTORCORE_CALL_TIMEOUT_MS";
/// Environment variable name for the supervisor child shutdown deadline in milliseconds.
pub const ENV_SHUTDOWN_DEADLINE_MS: &str = "ACTORCORE_SHUTDOWN_DEADLINE_MS";
/// Environment variable name for the actor thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "ACTORCORE_THREAD_NAME_PREFIX";
/// Environment variable name for the actor thread stack size.
pub const ENV_THREAD_STACK_SIZE: &str = "ACTORCORE_THREAD_STACK_SIZE";
/// Environment variable name for the stamped lock spin budget.
pub const ENV_LOCK_SPINS: &str = "ACTORCORE_LOCK_SPINS";

/// Error produced when a configuration source holds an unusable value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A variable was set but could not be parsed.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Human description of the accepted format.
        expected: &'static str,
        /// The raw value found.
        value: String,
    },
}

/// Apply environment variable overrides to an [`ActorSystemConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut ActorSystemConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_MAILBOX_CAPACITY) {
        let capacity = parse_usize(ENV_MAILBOX_CAPACITY, &val)?;
        config.default_mailbox_capacity = (capacity > 0).then_some(capacity);
    }
    if let Some(val) = read_env(ENV_OVERFLOW_POLICY) {
        config.overflow_policy = parse_policy(ENV_OVERFLOW_POLICY, &val)?;
    }
    if let Some(val) = read_env(ENV_CALL_TIMEOUT_MS) {
        let ms = parse_u64(ENV_CALL_TIMEOUT_MS, &val)?;
        config.default_call_timeout = (ms > 0).then(|| Duration::from_millis(ms));
    }
    if let Some(val) = read_env(ENV_SHUTDOWN_DEADLINE_MS) {
        config.default_shutdown_deadline =
            Duration::from_millis(parse_u64(ENV_SHUTDOWN_DEADLINE_MS, &val)?);
    }
    if let Some(val) = read_env(ENV_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    if let Some(val) = read_env(ENV_THREAD_STACK_SIZE) {
        config.thread_stack_size = Some(parse_usize(ENV_THREAD_STACK_SIZE, &val)?);
    }
    if let Some(val) = read_env(ENV_LOCK_SPINS) {
        config.lock_spins = parse_u32(ENV_LOCK_SPINS, &val)?;
    }
    Ok(())
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn invalid(var: &'static str, expected: &'static str, val: &str) -> ConfigError {
    ConfigError::InvalidValue {
        var,
        expected,
        value: val.to_string(),
    }
}

fn parse_usize(var: &'static str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|_| invalid(var, "unsigned integer", val))
}

fn parse_u64(var: &'static str, val: &str) -> Result<u64, ConfigError> {
    val.trim()
        .parse::<u64>()
        .map_err(|_| invalid(var, "unsigned integer", val))
}

fn parse_u32(var: &'static str, val: &str) -> Result<u32, ConfigError> {
    val.trim()
        .parse::<u32>()
        .map_err(|_| invalid(var, "u32", val))
}

fn parse_policy(var: &'static str, val: &str) -> Result<OverflowPolicy, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "throw" => Ok(OverflowPolicy::Throw),
        "drop" => Ok(OverflowPolicy::Drop),
        "block" => Ok(OverflowPolicy::Block),
        "backoff" => Ok(OverflowPolicy::Backoff),
        "interrupt" => Ok(OverflowPolicy::Interrupt),
        _ => Err(invalid(var, "throw|drop|block|backoff|interrupt", val)),
    }
}

// =========================================================================
// Tests
// =========================================================================
