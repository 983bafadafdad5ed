use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use mailpress::attachments::AttachmentFetcher;
use mailpress::config::Config;
use mailpress::publish::{Layout, Publisher};
use mailpress::server::{AppState, routes};
use mailpress::store::{ContentStore, GitHubStore};

#[derive(Parser, Debug)]
#[command(name = "mailpress", version, about = "Publish blog posts by email")]
struct Args {
    /// Path to the JSON config file
    #[arg(short = 'c', long = "config", default_value = "conf.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    // ── Clients ─────────────────────────────────────────────────────────
    let store: Arc<dyn ContentStore> = Arc::new(GitHubStore::from_config(&config)?);
    let fetcher = AttachmentFetcher::from_config(&config)?;
    let publisher = Publisher::new(store, Layout::from_config(&config));

    tracing::info!(
        repo = %format!("{}/{}", config.github_user, config.github_repo),
        branch = %config.branch,
        path = %config.path,
        authors = config.authors.len(),
        "Configuration loaded"
    );

    // ── Server ──────────────────────────────────────────────────────────
    let listen = config.listen;
    let state = AppState::new(Arc::new(config), Arc::new(publisher), Arc::new(fetcher));
    let app = routes(state);

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    tracing::info!(addr = %listen, "Webhook server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}
