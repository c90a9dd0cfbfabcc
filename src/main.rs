//! Snipbin server binary.

use clap::Parser;
use snipbin::app::App;
use snipbin::config::Config;
use snipbin::memory_store::MemoryStore;
use snipbin::models::{MemorySnippetStore, MemoryUserStore};
use snipbin::session_store::{CookieOptions, SessionManager};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Server for publishing and viewing text snippets.
#[derive(Parser, Debug)]
#[command(name = "snipbin")]
#[command(about = "Snippet publishing server", long_about = None)]
struct Args {
    /// Address to bind the HTTP listener to.
    #[arg(long, env = "SNIPBIN_ADDR")]
    addr: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = Config::from_env()?;
    if let Some(addr) = args.addr {
        config.bind_addr = addr;
    }

    let session_backend = Arc::new(MemoryStore::new());
    let sessions = Arc::new(SessionManager::new(
        session_backend.clone(),
        CookieOptions {
            secure: config.secure_cookies,
            ttl: config.session_ttl,
            ..CookieOptions::default()
        },
    ));

    // Reap expired sessions so the in-memory backend does not grow without
    // bound on a long-lived process.
    let cleanup_backend = session_backend.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(600));
        loop {
            interval.tick().await;
            cleanup_backend.cleanup().await;
        }
    });

    let app = Arc::new(App::new(
        Arc::new(MemoryUserStore::new()),
        Arc::new(MemorySnippetStore::new()),
        sessions,
    ));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "starting server");
    axum::serve(listener, app.into_service()).await?;

    Ok(())
}
