use anyhow::{Context, Result};
use clap::Parser;
use wsctl_web::{Cli, Config, api, build_state};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wsctl_web=info,libwsctl=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli)?;
    let state = build_state(&config)?;
    let app = api::with_cors(api::router(state), &config.allow_origins)?;

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind listener on {}", config.listen))?;

    tracing::info!(
        backend = ?config.backend,
        tasks_root = %config.tasks_root.display(),
        "wsctl-web listening on http://{}",
        config.listen
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down...");
}
