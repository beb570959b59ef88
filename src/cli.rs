use crate::config::{ClientConfig, StreamKind};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "screen-stream")]
#[command(version)]
#[command(about = "Receive a remote screen-capture stream over WebSocket")]
pub struct Args {
    /// Server address (host[:port] or ws:// / wss:// URL); defaults to the saved server
    pub server: Option<String>,

    /// Stream kind: live (H.264 MP4 fragments) or snapshot (JPEG stills)
    #[arg(long, value_enum)]
    pub kind: Option<StreamKind>,

    /// File the live stream's MP4 fragments are written to
    #[arg(long, short, default_value = "capture.mp4")]
    pub output: String,

    /// Directory where the latest snapshot is written as latest.jpg
    #[arg(long, default_value = "frames")]
    pub frames_dir: String,

    /// Config file path
    #[arg(long, default_value = "screen-stream.toml")]
    pub config: String,

    /// Save the server into the config file's recent list
    #[arg(long)]
    pub save: bool,

    /// Print recently used servers and exit
    #[arg(long)]
    pub recent: bool,

    /// Codec candidate to try (repeatable, in priority order); replaces the configured list
    #[arg(long = "codec")]
    pub codecs: Vec<String>,

    /// Seconds of buffered data kept behind the playback position
    #[arg(long)]
    pub retention: Option<f64>,

    /// Emit events as JSON lines instead of colored text
    #[arg(long)]
    pub json: bool,

    /// Verbose logging (overridden by RUST_LOG)
    #[arg(long, short)]
    pub verbose: bool,
}

impl Args {
    /// Overlay command-line choices on top of the file config.
    pub fn apply(&self, config: &mut ClientConfig) {
        if let Some(server) = &self.server {
            config.server = Some(server.trim().to_string());
        }
        if let Some(kind) = self.kind {
            config.kind = kind;
        }
        if !self.codecs.is_empty() {
            config.codecs = self.codecs.clone();
        }
        if let Some(secs) = self.retention {
            config.retention_secs = secs;
        }
    }
}
