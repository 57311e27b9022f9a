use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use channel_relay::commands::CliCommands;
use channel_relay::config::RelayConfig;
use channel_relay::context::RelayContext;
use channel_relay::store::LibSqlBackend;
use channel_relay::upstream::TelegramUpstream;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export RELAY_TARGET_CHANNEL=@my_feed RELAY_API_TOKEN=...");
        std::process::exit(1);
    });

    // Keep the guard alive so buffered file logs are flushed on exit.
    let file_appender = config
        .log_dir
        .as_ref()
        .map(|dir| tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "channel-relay.log")));
    let (file_writer, _log_guard) = match file_appender {
        Some((writer, guard)) => (Some(writer), Some(guard)),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(file_writer.map(|w| fmt::layer().with_ansi(false).with_writer(w)))
        .init();

    eprintln!("📡 Channel Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Target: {}", config.target_channel);
    eprintln!("   Interval: {} min", config.check_interval.as_secs() / 60);
    eprintln!("   DB: {}", config.db_path.display());
    eprintln!("   Type /help for commands, /quit to exit.\n");

    // ── Database ─────────────────────────────────────────────────────────
    let store = Arc::new(LibSqlBackend::new_local(&config.db_path).await.unwrap_or_else(|e| {
        eprintln!("Error: Failed to open database at {}: {}", config.db_path.display(), e);
        std::process::exit(1);
    }));

    // ── Upstream ─────────────────────────────────────────────────────────
    let upstream = Arc::new(TelegramUpstream::new(
        config.api_url.clone(),
        config.api_token.clone(),
    ));

    let ctx = Arc::new(RelayContext::new(config, store.clone(), store, upstream)?);
    ctx.start().await;

    let cli = CliCommands::new(Arc::clone(&ctx));
    tokio::select! {
        quit = cli.run() => {
            if !quit {
                // Detached stdin: keep relaying until interrupted.
                tracing::info!("stdin closed, running until Ctrl-C");
                tokio::signal::ctrl_c().await?;
            }
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nInterrupted");
        }
    }

    tracing::info!("Shutting down, waiting for the current channel to finish");
    ctx.shutdown().await;
    Ok(())
}
