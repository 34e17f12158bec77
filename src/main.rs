use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod assets;
mod config;
mod error;
mod index;
mod routes;
mod state;

use config::Settings;
use index::scanner;
use index::watcher::CatalogWatcher;
use state::catalog::Catalog;
use state::library::Library;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env()?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "creative_workbench=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // The default root is only a fallback; a missing one is not fatal
    if let Err(e) = std::fs::create_dir_all(&settings.default_root) {
        warn!(
            path = %settings.default_root.display(),
            error = %e,
            "could not create default root"
        );
    }

    let library = Library::open(&settings.db_path)?;
    info!(db = %library.path().display(), "catalog ready");
    let catalog = Arc::new(Catalog::new(library, settings.default_root.clone()));
    let watcher = Arc::new(CatalogWatcher::new(Arc::clone(&catalog)));

    // Bring the catalog in line with disk before serving, then go live
    {
        let catalog = Arc::clone(&catalog);
        let watcher = Arc::clone(&watcher);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = scanner::scan(&catalog) {
                warn!(error = %e, "initial scan failed");
            }
            if let Err(e) = watcher.ensure_started() {
                warn!(error = %e, "watcher did not start; catalog only updates on scan");
            }
        })
        .await?;
    }

    let app = routes::router(routes::AppState { catalog, watcher });

    let listener = TcpListener::bind(settings.bind).await?;
    info!(addr = %settings.bind, "creative workbench listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
    }
}
