//! Delivery backends.
//!
//! Both variants own a [`Hub`](crate::hub::Hub) and give connections in the
//! same process identical fan-out semantics; they differ only in where a
//! publish goes before reaching that hub.

mod distributed;
mod local;

pub use distributed::DistributedBackend;
pub use local::LocalBackend;

use crate::broker::RedisBroker;
use crate::connection::ConnectionHandle;
use crate::error::HubError;
use crate::hub::{HubConfig, HubHandle, Registration};
use crate::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[async_trait]
pub trait Backend: Send + Sync + 'static {
    fn kind(&self) -> BackendKind;

    /// The local coordinator, for membership queries and stats
    fn hub(&self) -> &HubHandle;

    /// Fans `message` out to every connection of its channel, wherever the
    /// backend's reach extends
    async fn publish(&self, message: Message) -> Result<(), HubError>;

    /// Enrolls `handle` in its channel. The returned registration is the only
    /// way to remove it again.
    async fn register(&self, handle: ConnectionHandle) -> Result<Registration, HubError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Single-process fan-out
    Local,
    /// Broker-backed fan-out shared between processes
    Distributed,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Local => write!(f, "local"),
            BackendKind::Distributed => write!(f, "distributed"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "memory" => Ok(BackendKind::Local),
            "distributed" | "redis" => Ok(BackendKind::Distributed),
            other => Err(HubError::BackendUnavailable(format!(
                "unknown backend kind: {other}"
            ))),
        }
    }
}

/// Everything needed to construct a backend at startup
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub kind: BackendKind,
    /// Broker URL, required for [`BackendKind::Distributed`]
    pub redis_url: Option<String>,
    /// Prepended to channel names to form broker topics
    pub topic_prefix: String,
    pub hub: HubConfig,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            kind: BackendKind::Local,
            redis_url: None,
            topic_prefix: String::new(),
            hub: HubConfig::default(),
        }
    }
}

/// Builds the backend selected by `settings`
pub async fn build_backend(settings: &BackendSettings) -> Result<Arc<dyn Backend>, HubError> {
    match settings.kind {
        BackendKind::Local => Ok(Arc::new(LocalBackend::new(settings.hub.clone()))),
        BackendKind::Distributed => {
            let url = settings.redis_url.as_deref().ok_or_else(|| {
                HubError::BackendUnavailable("distributed backend needs a broker URL".to_string())
            })?;
            let broker = RedisBroker::connect(url).await?;
            Ok(Arc::new(DistributedBackend::with_topic_prefix(
                broker,
                settings.hub.clone(),
                settings.topic_prefix.clone(),
            )))
        }
    }
}
