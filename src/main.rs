use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use tokio::signal;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer};
use tracing::{error, info};

use invitation_checkout as api;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Outbound gateway client
    let gateway = api::gateway::XenditGateway::new(
        cfg.gateway_base_url.clone(),
        cfg.gateway_secret_key.clone(),
        cfg.gateway_timeout(),
        cfg.invoice_duration_secs,
    )
    .context("failed to build payment gateway client")?;

    if cfg.payment_webhook_secret.is_none() {
        error!("APP__PAYMENT_WEBHOOK_SECRET is not set; every payment callback will be rejected");
    }

    // Aggregate app services used by HTTP handlers
    let services = api::handlers::AppServices::new(db_arc.clone(), Arc::new(gateway), &cfg);

    // Compose shared app state
    let app_state = api::AppState {
        db: db_arc.clone(),
        config: cfg.clone(),
        services,
    };

    let cors_layer = if cfg.is_development() {
        info!("Using permissive CORS in development environment");
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    };

    let app = api::app_router(app_state)
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(cors_layer);

    // Bind and serve
    let host: std::net::IpAddr = cfg
        .host
        .parse()
        .with_context(|| format!("invalid listen host '{}'", cfg.host))?;
    let addr = SocketAddr::from((host, cfg.port));
    info!("invitation-checkout listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("failed to install SIGTERM handler: {}", err);
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

    info!("shutdown signal received");
}
