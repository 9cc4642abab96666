use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use galeria::config::{Cli, Config};
use galeria::db;
use galeria::routes;
use galeria::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Gallery root
    std::fs::create_dir_all(&cli.dir)?;
    let gallery_dir = cli.dir.canonicalize()?;
    tracing::info!("Gallery directory: {}", gallery_dir.display());

    // Admin credentials, created with defaults on first run
    let config_path = absolute(&cli.config)?;
    let (config, created) = Config::load_or_create(&config_path)?;
    if created {
        tracing::info!(
            "Created default config at {} (edit to change admin credentials)",
            config_path.display()
        );
    }
    let state_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    // Database
    let pool = db::create_pool(&state_dir.join("gallery.db"))?;
    db::run_migrations(&pool)?;

    let state = AppState::new(config, pool, gallery_dir, &state_dir)?;
    let app = routes::router(state);

    let addr: SocketAddr = cli.addr.parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
