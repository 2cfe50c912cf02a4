mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parlor_api::notify::{HttpNotifier, LogNotifier, Notifier};
use parlor_api::service::ChatService;
use parlor_api::state::{AppState, AppStateInner};
use parlor_db::Database;
use parlor_gateway::connection;
use parlor_gateway::dispatcher::Dispatcher;

use crate::config::Config;

#[derive(Clone)]
struct GatewayState {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parlor=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Arc::new(Database::open(&config.db_path)?);
    let dispatcher = Dispatcher::new(config.bus_capacity);
    let notifier: Arc<dyn Notifier> = match &config.notify_url {
        Some(url) => {
            info!("Sending notifications to {}", url);
            Arc::new(HttpNotifier::new(url.clone()))
        }
        None => Arc::new(LogNotifier),
    };

    let service = ChatService::new(db.clone(), dispatcher.clone(), notifier, config.loader_ttl);
    let app_state: AppState = Arc::new(AppStateInner {
        service,
        jwt_secret: config.jwt_secret.clone(),
    });

    let gateway_state = GatewayState {
        db,
        dispatcher: dispatcher.clone(),
        jwt_secret: config.jwt_secret.clone(),
    };
    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(gateway_state);

    let app = Router::new()
        .merge(parlor_api::router(app_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Parlor server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(dispatcher))
        .await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.dispatcher, state.db, state.jwt_secret)
    })
}

/// Wait for Ctrl+C or SIGTERM, then close the realtime bus so open
/// subscriptions and gateway connections wind down.
async fn shutdown_signal(dispatcher: Dispatcher) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
    dispatcher.close();
}
