use anyhow::{Context, Result};
use clap::Parser;

use mobile_relay::{api, config::Config, events::init_logging, relay::spawn_relay};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_logging(&config.log_level)?;

    let addr = config.listen_addr()?;
    let injector = config.build_injector()?;
    let api_key = config.configured_api_key();
    if api_key.is_none() {
        tracing::warn!("no API key configured; every route is open to anyone who can reach {addr}");
    }

    let relay = spawn_relay(config.relay_settings(), injector);
    let app = api::router(relay, api_key);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind relay on {addr}"))?;
    tracing::info!(%addr, version = env!("CARGO_PKG_VERSION"), "mobile relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("relay server error")?;

    tracing::info!("mobile relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(error) => {
                    tracing::warn!(error = %error, "could not install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
