use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use algomate_common::config::AppConfig;
use algomate_notifier::{DispatcherConfig, Notifier, NotifierHandle, TelegramSender};

/// AlgoMate notification bot.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Spawn demo producer threads that each send a few messages
    #[arg(long)]
    demo: bool,

    /// Number of demo producer threads
    #[arg(long, default_value_t = 3)]
    demo_producers: usize,

    /// Messages sent by each demo producer
    #[arg(long, default_value_t = 3)]
    demo_messages: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "algomate_notifier=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    tracing::info!("AlgoMate notifier starting...");

    // Load configuration
    let config = AppConfig::from_env()?;
    tracing::info!(
        chat_id = %config.telegram_chat_id,
        base_interval_ms = config.base_interval_ms,
        allowed_users = config.allowed_user_ids.len(),
        "Configuration loaded"
    );

    let sender = TelegramSender::from_config(&config)?;
    let notifier = Arc::new(Notifier::new(sender, DispatcherConfig::from(&config)));
    notifier.start()?;

    if !notifier.wait_ready(Duration::from_secs(5)) {
        tracing::warn!("Dispatcher not ready after 5s; messages stay buffered until it is");
    }
    notifier.enqueue("AlgoMate notifier is online");

    if cli.demo {
        spawn_demo_producers(notifier.handle(), cli.demo_producers, cli.demo_messages);
    }

    let mut joiner = {
        let notifier = notifier.clone();
        tokio::task::spawn_blocking(move || notifier.join())
    };

    // Run until Ctrl+C, or until the dispatcher dies on its own
    let joined = tokio::select! {
        joined = &mut joiner => joined?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
            notifier.stop();
            joiner.await?
        }
    };

    if let Err(e) = joined {
        tracing::error!(error = %e, "Dispatcher exited with error");
        return Err(e.into());
    }

    tracing::info!("AlgoMate notifier stopped.");
    Ok(())
}

/// Stand-ins for strategy threads, each with its own handle.
fn spawn_demo_producers(handle: NotifierHandle, producers: usize, messages: usize) {
    for producer in 0..producers {
        let handle = handle.clone();
        std::thread::spawn(move || {
            for n in 1..=messages {
                handle.enqueue(format!("demo-strategy-{producer}: message {n}"));
                std::thread::sleep(Duration::from_millis(50));
            }
        });
    }
}
