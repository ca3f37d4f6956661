//! Per-channel configuration.

use tracing::warn;

/// A channel option value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionValue {
    Bool(bool),
    Number(u64),
}

/// Configuration applied to every stream channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Deliver queued inbound frames without an explicit `read()` request.
    pub auto_read: bool,
    /// Maximum frames delivered to the handler per read burst.
    pub max_messages_per_read: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            auto_read: true,
            max_messages_per_read: 16,
        }
    }
}

impl ChannelConfig {
    /// Apply a name-keyed option.
    ///
    /// Unknown names and invalid values are logged and ignored; option
    /// application never fails channel creation.
    pub fn set_option(&mut self, name: &str, value: OptionValue) {
        match (name, value) {
            ("auto_read", OptionValue::Bool(v)) => self.auto_read = v,
            ("max_messages_per_read", OptionValue::Number(v)) => {
                if v == 0 {
                    warn!("failed to set channel option {name}: must be > 0");
                } else {
                    self.max_messages_per_read = v as usize;
                }
            }
            ("auto_read", _) | ("max_messages_per_read", _) => {
                warn!("failed to set channel option {name}: wrong value type");
            }
            _ => warn!("unknown channel option: {name}"),
        }
    }
}
