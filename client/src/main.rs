use std::sync::Arc;
use std::time::Duration;

use carte_client::assets::StaticAssets;
use carte_client::charts::spawn_chart_observer;
use carte_client::commands::{self, Command};
use carte_client::config;
use carte_client::store::HttpFeatureStore;
use carte_client::{DataLoader, LayerRegistry, MapView, TracingNotifier, ViewSettings};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing_subscriber::EnvFilter;

const FRAME_INTERVAL: Duration = Duration::from_millis(16);

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let registry = match LayerRegistry::from_env() {
        Ok(registry) => registry,
        Err(e) => {
            tracing::error!(error = %e, "invalid layer definitions");
            return;
        }
    };
    let client = match config::http_client() {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "failed to build HTTP client");
            return;
        }
    };

    let api_base = config::api_base_url();
    let static_root = config::static_root();
    tracing::info!(%api_base, %static_root, "starting carte client");
    let store = Arc::new(HttpFeatureStore::new(client.clone(), api_base));
    let assets = Arc::new(StaticAssets::from_location(&static_root, client));
    let loader = DataLoader::new(store, assets)
        .with_page_size(config::page_size())
        .with_max_pages(config::max_pages());

    let mut view = MapView::mount(
        registry,
        loader,
        Arc::new(TracingNotifier),
        ViewSettings::from_env(),
    );
    let charts = spawn_chart_observer(view.subscribe_selection());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut frames = tokio::time::interval(FRAME_INTERVAL);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    println!("{}", commands::HELP);

    loop {
        let animating = view.viewport().is_animating();
        tokio::select! {
            () = &mut shutdown => break,
            Some(event) = view.next_event() => view.handle_event(event),
            _ = frames.tick(), if animating => {
                view.tick();
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match line.parse::<Command>() {
                    Ok(Command::Quit) => break,
                    Ok(command) => println!("{}", commands::execute(&mut view, command)),
                    Err(e) => println!("{e}"),
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "failed to read command");
                    break;
                }
            },
        }
    }

    view.unmount();
    if let Err(e) = charts.await {
        tracing::warn!(error = %e, "chart observer ended abnormally");
    }
    tracing::info!("carte client stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
