//! Client configuration: stream kind, endpoint URL building, codec candidates,
//! timing knobs, and the persisted list of recently used servers.

use std::path::Path;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::connection::ReconnectPolicy;
use crate::error::StreamError;
use crate::segment::ClassifierConfig;

/// How many servers the recent list keeps.
pub const RECENT_SERVERS_CAP: usize = 5;

/// Codec candidates in priority order: H.264 High, Main, Baseline,
/// Constrained Baseline, MPEG-4 Visual, then a bare MP4 type.
pub const DEFAULT_CODECS: &[&str] = &[
    r#"video/mp4; codecs="avc1.640028""#,
    r#"video/mp4; codecs="avc1.4d0028""#,
    r#"video/mp4; codecs="avc1.42e01e""#,
    r#"video/mp4; codecs="avc1.42801e""#,
    r#"video/mp4; codecs="mp4v.20.9""#,
    "video/mp4",
];

// ---------------------------------------------------------------------------
// Stream kind
// ---------------------------------------------------------------------------

/// Which server-side stream to consume. Chosen by the client, never negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Fragmented H.264-in-MP4 segments.
    #[default]
    Live,
    /// JPEG stills, one per binary frame.
    Snapshot,
}

impl StreamKind {
    pub fn endpoint(&self) -> &'static str {
        match self {
            StreamKind::Live => "/screen/live",
            StreamKind::Snapshot => "/screen/snapstream",
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Live => write!(f, "live"),
            StreamKind::Snapshot => write!(f, "snapshot"),
        }
    }
}

/// Build the full WebSocket URL for `server` and `kind`.
///
/// A bare host gets `wss://` prepended; explicit `ws://` / `wss://` prefixes
/// are kept as typed.
pub fn build_ws_url(server: &str, kind: StreamKind) -> Result<String, StreamError> {
    let server = server.trim();
    if server.is_empty() {
        return Err(StreamError::Connect {
            url: String::new(),
            detail: "server address is empty".to_string(),
        });
    }
    let base = if server.starts_with("ws://") || server.starts_with("wss://") {
        server.to_string()
    } else {
        format!("wss://{server}")
    };
    Ok(format!("{base}{}", kind.endpoint()))
}

// ---------------------------------------------------------------------------
// ClientConfig
// ---------------------------------------------------------------------------

/// File-backed client settings. Every field has a default so a partial TOML
/// file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Last-used server address (host[:port] or a full ws/wss URL).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    pub kind: StreamKind,
    /// Codec candidates tried in order until one works.
    pub codecs: Vec<String>,
    /// How far behind the playback position buffered data is kept.
    pub retention_secs: f64,
    pub janitor_tick_ms: u64,
    pub reconnect_base_ms: u64,
    pub max_reconnect_attempts: u32,
    pub init_size_threshold: usize,
    pub init_ordinal_limit: u64,
    pub init_refresh_secs: u64,
    /// Most recently used servers, newest first.
    pub recent_servers: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: None,
            kind: StreamKind::Live,
            codecs: DEFAULT_CODECS.iter().map(|c| c.to_string()).collect(),
            retention_secs: 5.0,
            janitor_tick_ms: 1000,
            reconnect_base_ms: 2000,
            max_reconnect_attempts: 5,
            init_size_threshold: 1024,
            init_ordinal_limit: 3,
            init_refresh_secs: 30,
            recent_servers: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Load from `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, StreamError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| StreamError::Config(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<(), StreamError> {
        let text = toml::to_string_pretty(self).map_err(|e| StreamError::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Make `server` the current server and move it to the front of the
    /// recent list (de-duplicated, capped at [`RECENT_SERVERS_CAP`]).
    pub fn remember_server(&mut self, server: &str) {
        let server = server.trim();
        if server.is_empty() {
            return;
        }
        self.recent_servers.retain(|s| s != server);
        self.recent_servers.insert(0, server.to_string());
        self.recent_servers.truncate(RECENT_SERVERS_CAP);
        self.server = Some(server.to_string());
    }

    /// Full URL for the configured server and kind.
    pub fn ws_url(&self) -> Result<String, StreamError> {
        build_ws_url(self.server.as_deref().unwrap_or(""), self.kind)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            Duration::from_millis(self.reconnect_base_ms),
            self.max_reconnect_attempts,
        )
    }

    pub fn classifier(&self) -> ClassifierConfig {
        ClassifierConfig {
            size_threshold: self.init_size_threshold,
            ordinal_limit: self.init_ordinal_limit,
            refresh_after: Duration::from_secs(self.init_refresh_secs),
        }
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs_f64(self.retention_secs.max(0.0))
    }

    pub fn janitor_tick(&self) -> Duration {
        Duration::from_millis(self.janitor_tick_ms.max(1))
    }
}
