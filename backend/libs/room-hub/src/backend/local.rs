use super::{Backend, BackendKind};
use crate::connection::ConnectionHandle;
use crate::error::HubError;
use crate::hub::{Hub, HubConfig, HubHandle, Registration};
use crate::message::Message;
use async_trait::async_trait;

/// In-process backend: publishes loop straight back into the local hub
pub struct LocalBackend {
    hub: HubHandle,
}

impl LocalBackend {
    pub fn new(config: HubConfig) -> Self {
        Self {
            hub: Hub::spawn(config),
        }
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn hub(&self) -> &HubHandle {
        &self.hub
    }

    async fn publish(&self, message: Message) -> Result<(), HubError> {
        self.hub.publish(message).await
    }

    async fn register(&self, handle: ConnectionHandle) -> Result<Registration, HubError> {
        let registration = Registration::new(self.hub.clone(), &handle);
        self.hub.register(handle).await?;
        Ok(registration)
    }
}
