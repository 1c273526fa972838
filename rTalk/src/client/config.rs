//! Conversation configuration.

use backon::ExponentialBuilder;
use std::time::Duration;

/// Timeouts and buffers for conversations.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Limit for historical and reconciliation fetches.
    pub fetch_timeout: Duration,
    /// Limit for a send insert.
    pub send_timeout: Duration,
    /// Buffer of view events per listener.
    pub view_capacity: usize,
    /// Live feed reconnect behavior.
    pub reconnect: ReconnectPolicy,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(10),
            view_capacity: 64,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Backoff applied when the live feed has to be re-established.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: usize,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            min_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            max_attempts: 8,
        }
    }
}

impl ReconnectPolicy {
    /// Never reconnect.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub(crate) fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts)
    }
}
