//! Channel identity: the validated room name and the context that carries it
//! from the accepting layer into the core.

use crate::error::HubError;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Longest accepted channel name, in bytes
pub const MAX_CHANNEL_LEN: usize = 256;

/// Name of a logical channel ("room").
///
/// Cheap to clone; every message and handle carries one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelName(Arc<str>);

impl ChannelName {
    pub fn new(name: impl AsRef<str>) -> Result<Self, HubError> {
        let name = name.as_ref();

        if name.trim().is_empty() {
            return Err(HubError::InvalidChannel("channel is empty".to_string()));
        }
        if name.len() > MAX_CHANNEL_LEN {
            return Err(HubError::InvalidChannel(format!(
                "channel longer than {} bytes",
                MAX_CHANNEL_LEN
            )));
        }
        if name.chars().any(|c| c.is_control()) {
            return Err(HubError::InvalidChannel(
                "channel contains control characters".to_string(),
            ));
        }

        Ok(Self(Arc::from(name)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChannelName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for ChannelName {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for ChannelName {
    type Error = HubError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<String> for ChannelName {
    type Error = HubError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Request-scoped context holding the channel a connection belongs to.
///
/// The accepting layer resolves the channel (path segment, query string, matchmaking
/// decision) and attaches it here; the core only ever reads it back.
#[derive(Debug, Clone, Default)]
pub struct ChannelContext {
    channel: Option<ChannelName>,
}

impl ChannelContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a context carrying `channel`, replacing any previous one
    pub fn attach_channel(self, channel: ChannelName) -> Self {
        Self {
            channel: Some(channel),
        }
    }

    pub fn read_channel(&self) -> Option<&ChannelName> {
        self.channel.as_ref()
    }

    /// Like [`read_channel`](Self::read_channel) but fails with
    /// [`HubError::ChannelMissing`] when nothing was attached
    pub fn require_channel(&self) -> Result<&ChannelName, HubError> {
        self.channel.as_ref().ok_or(HubError::ChannelMissing)
    }
}
