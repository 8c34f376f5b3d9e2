use inspirational::config::Config;
use inspirational::poster::PosterService;
use inspirational::server::{PosterServer, PKG_NAME, VERSION};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("inspirational=debug".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path.display(), error = %e, "Failed to load configuration");
        e
    })?;

    info!(path = %config_path.display(), "Configuration loaded");

    print_startup_banner(&config);

    let bind_addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .map_err(|e| {
            error!(bind = %config.server.bind, port = config.server.port, error = %e, "Invalid bind address");
            anyhow::anyhow!("Invalid bind address: {}", e)
        })?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let service = Arc::new(PosterService::from_config(&config));
    let server = PosterServer::new(bind_addr, service, shutdown_rx);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "Poster server error");
        }
    });

    // Wait for shutdown signal (Ctrl+C or SIGTERM)
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down...");
    }

    let _ = shutdown_tx.send(true);

    // The server drains open connections; a render cannot outlast timeout plus grace
    let drain_limit =
        config.render.timeout() + config.render.kill_grace_period() + Duration::from_secs(1);
    if tokio::time::timeout(drain_limit, server_handle).await.is_err() {
        warn!(
            drain_limit_ms = drain_limit.as_millis() as u64,
            "Connections still open after drain limit"
        );
    }

    info!("Shutdown complete");
    Ok(())
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting poster server");
    info!(
        bind = %config.server.bind,
        port = config.server.port,
        "Server configuration"
    );
    info!(
        fonts_dir = %config.assets.fonts_dir.display(),
        images_dir = %config.assets.images_dir.display(),
        image_extension = %config.assets.image_extension,
        "Asset directories"
    );
    info!(
        command = %config.render.command,
        args = ?config.render.args,
        width = config.render.width,
        height = config.render.height,
        quality = config.render.quality,
        timeout_secs = config.render.timeout_secs,
        kill_grace_period_secs = config.render.kill_grace_period_secs,
        "Render tool"
    );
    info!(trailer = %config.caption.trailer, "Caption settings");
}
