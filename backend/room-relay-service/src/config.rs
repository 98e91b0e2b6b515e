use crate::error::AppError;
use dotenvy::dotenv;
use room_hub::{
    BackendKind, BackendSettings, HubConfig, DEFAULT_EVENT_CAPACITY, DEFAULT_OUTBOUND_CAPACITY,
};
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(AppError::Config(format!(
                "LOG_FORMAT must be pretty or json, got {other}"
            ))),
        }
    }
}

/// How payloads are framed when written back to websocket clients.
///
/// Rooms carry bytes only, so the frame type a sender used is not known on
/// delivery. `Auto` sends valid UTF-8 as text; `Binary` keeps every payload a
/// binary frame for clients that need byte-exact framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutboundFrames {
    #[default]
    Auto,
    Binary,
}

impl OutboundFrames {
    pub fn as_text(self, payload: &[u8]) -> Option<&str> {
        match self {
            OutboundFrames::Auto => std::str::from_utf8(payload).ok(),
            OutboundFrames::Binary => None,
        }
    }
}

impl FromStr for OutboundFrames {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(OutboundFrames::Auto),
            "binary" => Ok(OutboundFrames::Binary),
            other => Err(AppError::Config(format!(
                "WS_OUTBOUND_FRAMES must be auto or binary, got {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub backend: BackendKind,
    pub redis_url: String,
    /// Prepended to room names to form broker topics
    pub topic_prefix: String,
    pub outbound_queue_capacity: usize,
    pub hub_event_capacity: usize,
    /// `None` disables idle disconnects
    pub idle_timeout: Option<Duration>,
    pub outbound_frames: OutboundFrames,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = parse_or(&lookup, "PORT", 8080)?;
        let backend = match lookup("ROOM_BACKEND") {
            Some(value) => value
                .parse()
                .map_err(|e| AppError::Config(format!("ROOM_BACKEND: {e}")))?,
            None => BackendKind::Local,
        };
        let redis_url = lookup("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".into());
        let topic_prefix = lookup("BROKER_TOPIC_PREFIX").unwrap_or_default();

        let outbound_queue_capacity =
            parse_or(&lookup, "OUTBOUND_QUEUE_CAPACITY", DEFAULT_OUTBOUND_CAPACITY)?;
        let hub_event_capacity = parse_or(&lookup, "HUB_EVENT_CAPACITY", DEFAULT_EVENT_CAPACITY)?;
        if outbound_queue_capacity == 0 || hub_event_capacity == 0 {
            return Err(AppError::Config(
                "queue capacities must be greater than zero".into(),
            ));
        }

        let idle_secs: u64 = parse_or(&lookup, "WS_IDLE_TIMEOUT_SECS", 0)?;
        let idle_timeout = (idle_secs > 0).then(|| Duration::from_secs(idle_secs));
        let outbound_frames = match lookup("WS_OUTBOUND_FRAMES") {
            Some(value) => value.parse()?,
            None => OutboundFrames::Auto,
        };

        let log_format = match lookup("LOG_FORMAT") {
            Some(value) => value.parse()?,
            None => LogFormat::Pretty,
        };

        Ok(Self {
            host,
            port,
            backend,
            redis_url,
            topic_prefix,
            outbound_queue_capacity,
            hub_event_capacity,
            idle_timeout,
            outbound_frames,
            log_format,
        })
    }

    pub fn backend_settings(&self) -> BackendSettings {
        BackendSettings {
            kind: self.backend,
            redis_url: Some(self.redis_url.clone()),
            topic_prefix: self.topic_prefix.clone(),
            hub: HubConfig {
                event_capacity: self.hub_event_capacity,
            },
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{key} is not a valid number: {raw}"))),
        None => Ok(default),
    }
}
