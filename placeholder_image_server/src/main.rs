use std::{env, net::SocketAddr, path::Path, sync::Arc};

use anyhow::{Context, Result};
use dotenvy::dotenv;
use placeholder_image::{PlaceholderFont, PlaceholderRenderer, PlaceholderStyle};
use placeholder_image_server::{AppConfig, AppState, create_app};
use poem::{Server, listener::TcpListener};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_ADDR: &str = "0.0.0.0:7860";
const BYTES_PER_MEGABYTE: usize = 1024 * 1024;
const DEFAULT_FONT_CANDIDATES: &[&str] = &[
    "DejaVuSans.ttf",
    "assets/fonts/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
];

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    let addr = read_addr()?;
    let font = read_font()?;
    let max_body_size = read_max_body_size();

    info!(family = ?font.family(), ?max_body_size, "configuration loaded");
    let renderer = PlaceholderRenderer::new(PlaceholderStyle::default(), font);
    let config = AppConfig {
        state: AppState {
            renderer: Arc::new(renderer),
        },
        max_body_size,
        server_base_url: Some(format!("http://{addr}")),
    };

    let listener = TcpListener::bind(addr);
    let app = create_app(&config);

    info!(%addr, "listening");
    Server::new(listener)
        .run_with_graceful_shutdown(app, shutdown_signal(), None)
        .await
        .context("server error")?;
    info!("server stopped");
    Ok(())
}

fn read_addr() -> Result<SocketAddr> {
    let raw = env::var("PLACEHOLDER_IMAGE_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_owned());
    raw.parse().with_context(|| format!("invalid addr {raw}"))
}

/// An explicitly configured font must load; otherwise the first bundled
/// candidate that loads wins, then the system sans-serif family.
fn read_font() -> Result<PlaceholderFont> {
    if let Ok(raw) = env::var("PLACEHOLDER_IMAGE_FONT") {
        return PlaceholderFont::load(Path::new(&raw))
            .with_context(|| format!("failed to load PLACEHOLDER_IMAGE_FONT {raw}"));
    }

    for candidate in DEFAULT_FONT_CANDIDATES {
        let path = Path::new(candidate);
        if !path.is_file() {
            continue;
        }
        match PlaceholderFont::load(path) {
            Ok(font) => return Ok(font),
            Err(err) => warn!(%err, path = %path.display(), "skipping unusable font"),
        }
    }

    warn!("DejaVuSans.ttf not found, falling back to the system sans-serif font");
    Ok(PlaceholderFont::system())
}

/// Bodies are unbounded unless `PLACEHOLDER_IMAGE_MAX_BODY` (MiB) is set.
fn read_max_body_size() -> Option<usize> {
    let value = env::var("PLACEHOLDER_IMAGE_MAX_BODY").ok()?;
    match value.trim().parse::<usize>() {
        Ok(mb) => {
            let limit = mb.checked_mul(BYTES_PER_MEGABYTE);
            if limit.is_none() {
                warn!(%value, "PLACEHOLDER_IMAGE_MAX_BODY overflow, leaving bodies unbounded");
            }
            limit
        }
        Err(err) => {
            warn!(%value, %err, "failed to parse PLACEHOLDER_IMAGE_MAX_BODY (MiB), leaving bodies unbounded");
            None
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(env_filter).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(%err, "failed to listen for Ctrl-C");
        }
        info!("received Ctrl-C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("received SIGTERM, shutting down");
            }
            Err(err) => {
                error!(%err, "failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(unix)]
    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    };

    #[cfg(not(unix))]
    ctrl_c.await;
}
