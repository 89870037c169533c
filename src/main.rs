// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::http::{HeaderValue, header};
use cachet::{
    AppConfig, AppState, config::LoggingSettings, create_router, state::CONFIG_WARMUP_CATEGORY,
};
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

fn init_tracing(settings: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.as_str()));
    let builder = fmt().with_env_filter(filter);
    if settings.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::var_os("CACHET_CONFIG") {
        Some(path) => AppConfig::load_with_path(PathBuf::from(path))?,
        None => AppConfig::load()?,
    };
    init_tracing(&config.logging);
    info!("Starting cachet...");
    config.validate()?;

    let app_state = AppState::from_config(&config).await?;

    if config.cache.warm_on_start && !config.cache.warmup.is_empty() {
        let outcome = app_state
            .cache
            .warmup_category(CONFIG_WARMUP_CATEGORY)
            .await;
        if !outcome.success {
            warn!(
                "Startup warmup incomplete: {} loaded, {} failed",
                outcome.affected, outcome.failed
            );
        }
    }
    app_state.cache.spawn_sweeper().await;

    let cache = app_state.cache.clone();
    let app = create_router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    cache.flush_and_close().await;
    info!("Server stopped");
    Ok(())
}
