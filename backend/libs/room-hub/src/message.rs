use crate::channel::ChannelName;
use bytes::Bytes;

/// The unit exchanged through the hub: an opaque payload addressed to one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    channel: ChannelName,
    payload: Bytes,
}

impl Message {
    pub fn new(channel: ChannelName, payload: impl Into<Bytes>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }

    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}
