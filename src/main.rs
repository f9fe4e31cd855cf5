use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use page_inbox::api::HttpInboxApi;
use page_inbox::config::Config;
use page_inbox::console::{spawn_stdin_reader, ConsoleView};
use page_inbox::push::PushChannel;
use page_inbox::service::inbox_service::{Inbox, InboxSettings};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    // Logs go to stderr; stdout belongs to the console view
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "page_inbox=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // ── Session & configuration ──────────────────────────────────────────────
    let config = Config::from_env()?;
    info!("Inbox backend at {}", config.api_url);

    // ── Dependency wiring ────────────────────────────────────────────────────
    let api = HttpInboxApi::new(&config.api_url, config.session.clone(), config.http_timeout)?;
    let channel = PushChannel::init(&config)?;
    let view = ConsoleView::stdout(config.view_rows);
    let inbox = Inbox::new(Arc::new(api), channel.source(), view, InboxSettings::from(&config));

    // ── Run ──────────────────────────────────────────────────────────────────
    let (commands_tx, commands_rx) = mpsc::channel(32);
    let reader = spawn_stdin_reader(commands_tx);
    inbox.run(commands_rx).await;

    // Session end
    reader.abort();
    channel.teardown().await;
    Ok(())
}
