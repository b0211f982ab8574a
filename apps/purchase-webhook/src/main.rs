use anyhow::{Context, Result};
use barber_blueprint_purchase_webhook::build_router;
use barber_blueprint_purchase_webhook::config::{Config, LogFormat};
use barber_blueprint_purchase_webhook::purchase_store::purchase_store_from_config;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    init_tracing(&config);

    if !config.webhook_secret_configured() {
        tracing::warn!(
            target: "blueprint.startup",
            "BLUEPRINT_WEBHOOK_SECRET is not set; every webhook request will be rejected",
        );
    }

    let purchases =
        purchase_store_from_config(&config).context("failed to initialize purchase store")?;
    let bind_addr = config.bind_addr;
    let webhook_path = config.webhook_path.clone();
    let backend = purchases.backend_name();

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!(
        target: "blueprint.startup",
        addr = %bind_addr,
        webhook_path = %webhook_path,
        purchase_store = backend,
        "purchase webhook listening",
    );

    axum::serve(listener, build_router(config, purchases))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server terminated unexpectedly")?;

    tracing::info!(target: "blueprint.startup", "purchase webhook stopped");
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(
            target: "blueprint.startup",
            error = %error,
            "failed to listen for shutdown signal",
        );
        std::future::pending::<()>().await;
    }
}
