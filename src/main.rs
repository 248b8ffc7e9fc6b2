use std::net::SocketAddr;
use std::time::Duration;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use menu_concierge_api::config::{init_tracing, load_config};
use menu_concierge_api::throttle;
use menu_concierge_api::{app, build_state};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        anyhow::anyhow!(e.to_string())
    })?;
    init_tracing(config.log_level(), config.log_json);

    info!(
        environment = %config.environment,
        model = %config.completion_model,
        "starting menu concierge api"
    );

    let cors = build_cors_layer(
        config.cors_allowed_origins.as_deref(),
        config.should_allow_permissive_cors(),
        config.cors_allow_credentials,
    );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen address: {}", e))?;
    let sweep_interval = Duration::from_secs(config.throttle_sweep_secs);

    let state = build_state(config).map_err(|e| {
        error!("failed to assemble application state: {}", e);
        anyhow::anyhow!(e.to_string())
    })?;

    tokio::spawn(throttle::start_cleanup_task(
        state.throttle.clone(),
        sweep_interval,
        sweep_interval,
    ));

    let router = app(state).layer(cors);

    info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("server stopped");
    Ok(())
}

fn build_cors_layer(
    allowed_origins: Option<&str>,
    allow_permissive: bool,
    allow_credentials: bool,
) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::OPTIONS];
    let headers = [AUTHORIZATION, CONTENT_TYPE];

    if let Some(origins) = allowed_origins {
        let parsed: Vec<HeaderValue> = origins
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin, "ignoring unparseable CORS origin");
                    None
                }
            })
            .collect();
        if !parsed.is_empty() {
            let layer = CorsLayer::new()
                .allow_origin(parsed)
                .allow_methods(methods)
                .allow_headers(headers);
            return if allow_credentials {
                layer.allow_credentials(true)
            } else {
                layer
            };
        }
        warn!("no valid CORS origins configured, falling back to permissive");
    }

    if allow_permissive {
        // Credentials cannot be combined with a wildcard origin.
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!("failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
