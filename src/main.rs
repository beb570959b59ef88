use clap::Parser;
use colored::*;
use std::path::Path;
use tokio::sync::mpsc;

use screen_stream::cli::Args;
use screen_stream::config::ClientConfig;
use screen_stream::events::AppenderEvent;
use screen_stream::session::{SessionCommand, StreamSession};
use screen_stream::sink::FileSinkFactory;
use screen_stream::snapshot::FileFrameDisplay;
use screen_stream::stats::format_bytes;

fn init_logging(verbose: bool) {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if verbose {
            "screen_stream=debug".to_string()
        } else {
            "screen_stream=warn".to_string()
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_event(event: &AppenderEvent) {
    match event {
        AppenderEvent::ConnectionState { state } => {
            println!("{} {}", "[ws]".bright_blue(), state);
        }
        AppenderEvent::ReconnectScheduled { attempt, delay_ms } => {
            println!(
                "{} attempt {} in {:.1}s",
                "[reconnect]".yellow(),
                attempt,
                *delay_ms as f64 / 1000.0
            );
        }
        AppenderEvent::CodecSelected { codec } => {
            println!("{} {}", "[codec]".bright_green(), codec);
        }
        AppenderEvent::CodecRejected { codec, reason } => {
            println!("{} {} ({})", "[codec rejected]".yellow(), codec, reason);
        }
        AppenderEvent::InitSegment { ordinal, bytes } => {
            println!(
                "{} chunk {} ({})",
                "[init]".bright_magenta(),
                ordinal,
                format_bytes(*bytes as u64)
            );
        }
        AppenderEvent::SnapshotShown { frame, bytes } => {
            println!(
                "{} #{} ({})",
                "[snapshot]".bright_cyan(),
                frame,
                format_bytes(*bytes as u64)
            );
        }
        AppenderEvent::Stats(stats) => {
            println!(
                "{} {} chunks, {}, {:.1} kbps",
                "[stats]".dimmed(),
                stats.chunks,
                format_bytes(stats.bytes),
                stats.kbps
            );
        }
        AppenderEvent::BufferHealth { ahead_secs, percent } => {
            println!("{} {:.2}s ({:.0}%)", "[buffer]".dimmed(), ahead_secs, percent);
        }
        AppenderEvent::Warning { message } => {
            eprintln!("{} {}", "[warn]".yellow(), message);
        }
        AppenderEvent::Fatal { message } => {
            eprintln!("{} {}", "[error]".bright_red(), message);
        }
        AppenderEvent::SegmentAppended { .. } | AppenderEvent::BufferTrimmed { .. } => {}
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config_path = Path::new(&args.config);
    let mut config = ClientConfig::load(config_path)?;

    if args.recent {
        if config.recent_servers.is_empty() {
            println!("{}", "no saved servers".dimmed());
        }
        for (i, server) in config.recent_servers.iter().enumerate() {
            println!("{:>2}. {}", i + 1, server);
        }
        return Ok(());
    }

    args.apply(&mut config);
    let url = config.ws_url()?;
    if args.save {
        if let Some(server) = config.server.clone() {
            config.remember_server(&server);
            config.save(config_path)?;
            eprintln!("{} {}", "saved".bright_green(), config_path.display());
        }
    }
    eprintln!("{} {} ({})", "connecting".bright_blue(), url, config.kind);

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let session = StreamSession::new(
        config,
        Box::new(FileSinkFactory::new(&args.output)),
        Box::new(FileFrameDisplay::new(&args.frames_dir)?),
        events_tx,
    );

    let json = args.json;
    let printer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            if json {
                if let Ok(line) = serde_json::to_string(&event) {
                    println!("{line}");
                }
            } else {
                print_event(&event);
            }
        }
    });

    let ctrl_c_tx = cmd_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = ctrl_c_tx.send(SessionCommand::Shutdown);
        }
    });

    let result = session.run(cmd_rx).await;
    drop(cmd_tx);
    let _ = printer.await;
    result?;
    Ok(())
}
