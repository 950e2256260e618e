//! Actor system configuration types.
//!
//! These types hold the concrete values that drive runtime behavior. In most
//! cases you should use [`ActorSystemBuilder`](super::ActorSystemBuilder) to
//! construct a system rather than creating an [`ActorSystemConfig`] directly.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `default_mailbox_capacity` | `None` (unbounded linked-array queue) |
//! | `overflow_policy` | `Throw` |
//! | `default_call_timeout` | `None` (wait forever) |
//! | `default_shutdown_deadline` | 5 s |
//! | `thread_name_prefix` | `"actorcore"` |
//! | `thread_stack_size` | `None` (platform default) |
//! | `lock_spins` | 64 on multi-core hosts, 0 otherwise |

use std::time::Duration;

use crate::mailbox::{MailboxConfig, OverflowPolicy};

const DEFAULT_THREAD_NAME_PREFIX: &str = "actorcore";
const MIN_STACK_SIZE: usize = 64 * 1024;

/// Actor system configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorSystemConfig {
    /// Mailbox capacity for actors that do not choose one (`None` = unbounded).
    pub default_mailbox_capacity: Option<usize>,
    /// What a sender experiences when a bounded mailbox is full.
    pub overflow_policy: OverflowPolicy,
    /// Timeout applied by `call` when the caller gives none.
    pub default_call_timeout: Option<Duration>,
    /// How long a supervisor waits for a child to stop before interrupting it.
    pub default_shutdown_deadline: Duration,
    /// Name prefix for actor threads.
    pub thread_name_prefix: String,
    /// Stack size per actor thread.
    pub thread_stack_size: Option<usize>,
    /// Spins before a contended stamped lock parks the caller.
    pub lock_spins: u32,
}

impl ActorSystemConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.default_mailbox_capacity == Some(0) {
            self.default_mailbox_capacity = None;
        }
        if self.thread_name_prefix.is_empty() {
            self.thread_name_prefix = DEFAULT_THREAD_NAME_PREFIX.to_string();
        }
        if let Some(size) = self.thread_stack_size {
            self.thread_stack_size = Some(size.max(MIN_STACK_SIZE));
        }
        if self.default_call_timeout == Some(Duration::ZERO) {
            self.default_call_timeout = None;
        }
        if self.default_shutdown_deadline.is_zero() {
            self.default_shutdown_deadline = Duration::from_millis(1);
        }
    }

    /// The mailbox configuration used when an actor does not pick its own.
    #[must_use]
    pub fn default_mailbox(&self) -> MailboxConfig {
        MailboxConfig {
            capacity: self.default_mailbox_capacity,
            policy: self.overflow_policy,
        }
    }

    pub(crate) fn default_lock_spins() -> u32 {
        let cpus = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        if cpus > 1 {
            1 << 6
        } else {
            0
        }
    }
}

impl Default for ActorSystemConfig {
    fn default() -> Self {
        Self {
            default_mailbox_capacity: None,
            overflow_policy: OverflowPolicy::Throw,
            default_call_timeout: None,
            default_shutdown_deadline: Duration::from_secs(5),
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            thread_stack_size: None,
            lock_spins: Self::default_lock_spins(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn test_default_config_sane() {
        init_test("test_default_config_sane");
        let config = ActorSystemConfig::default();
        crate::assert_with_log!(
            config.default_mailbox_capacity.is_none(),
            "default mailbox unbounded",
            "None",
            format!("{:?}", config.default_mailbox_capacity)
        );
        crate::assert_with_log!(
            config.overflow_policy == OverflowPolicy::Throw,
            "overflow_policy",
            OverflowPolicy::Throw,
            config.overflow_policy
        );
        crate::assert_with_log!(
            config.default_shutdown_deadline == Duration::from_secs(5),
            "shutdown deadline",
            Duration::from_secs(5),
            config.default_shutdown_deadline
        );
        crate::assert_with_log!(
            !config.thread_name_prefix.is_empty(),
            "thread_name_prefix",
            true,
            !config.thread_name_prefix.is_empty()
        );
        crate::test_complete!("test_default_config_sane");
    }

    #[test]
    fn test_normalize_clamps_values() {
        init_test("test_normalize_clamps_values");
        let mut config = ActorSystemConfig {
            default_mailbox_capacity: Some(0),
            thread_name_prefix: String::new(),
            thread_stack_size: Some(1),
            default_call_timeout: Some(Duration::ZERO),
            default_shutdown_deadline: Duration::ZERO,
            ..ActorSystemConfig::default()
        };
        config.normalize();
        crate::assert_with_log!(
            config.default_mailbox_capacity.is_none(),
            "zero capacity means unbounded",
            "None",
            format!("{:?}", config.default_mailbox_capacity)
        );
        crate::assert_with_log!(
            config.thread_name_prefix == "actorcore",
            "prefix restored",
            "actorcore",
            config.thread_name_prefix
        );
        crate::assert_with_log!(
            config.thread_stack_size == Some(MIN_STACK_SIZE),
            "stack size floor",
            Some(MIN_STACK_SIZE),
            config.thread_stack_size
        );
        crate::assert_with_log!(
            config.default_call_timeout.is_none(),
            "zero timeout means none",
            "None",
            format!("{:?}", config.default_call_timeout)
        );
        crate::assert_with_log!(
            !config.default_shutdown_deadline.is_zero(),
            "shutdown deadline positive",
            true,
            config.default_shutdown_deadline
        );
        crate::test_complete!("test_normalize_clamps_values");
    }

    #[test]
    fn test_default_mailbox_follows_config() {
        init_test("test_default_mailbox_follows_config");
        let config = ActorSystemConfig {
            default_mailbox_capacity: Some(8),
            overflow_policy: OverflowPolicy::Block,
            ..ActorSystemConfig::default()
        };
        let mailbox = config.default_mailbox();
        crate::assert_with_log!(
            mailbox.capacity == Some(8) && mailbox.policy == OverflowPolicy::Block,
            "mailbox config",
            "Some(8)/Block",
            format!("{mailbox:?}")
        );
    }
}
