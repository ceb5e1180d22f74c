mod error;
mod handlers;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderName;
use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;
use clap::Parser;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::ERROR_HEADER;
use crate::handlers::*;
use crate::state::{create_default_config, load_config, AppState};

const IMPORT_BODY_LIMIT: usize = 64 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(short, long, default_value = "config/consee.toml")]
    config: PathBuf,
    /// Secret of the consul management token; overrides the config file.
    #[arg(short, long)]
    token: Option<String>,
    #[arg(short, long)]
    port: Option<u16>,
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let created = !args.config.exists();
    if created {
        create_default_config(&args.config)?;
    }

    let mut config = load_config(&args.config)?;
    if let Some(token) = &args.token {
        config.set("consul.admin_token", token.as_str())?;
    }
    if let Some(port) = args.port {
        config.set("server.port", port.to_string())?;
    }

    let level = if args.verbose {
        "debug".to_string()
    } else {
        config.get_string("log.level")
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
    if created {
        warn!(path = %args.config.display(), "config file missing, created default config");
    }

    let state = Arc::new(AppState::from_config(&config)?);
    if let Err(err) = state.reconciler.initialize().await {
        error!(error = %err, "initialization failed");
        return Err(err.into());
    }

    let port = u16::try_from(config.get_number("server.port"))?;
    let listen = SocketAddr::from(([0, 0, 0, 0], port));
    info!("consee listening on {}", listen);
    let listener = tokio::net::TcpListener::bind(listen).await?;
    axum::serve(listener, app(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

fn app(state: Arc<AppState>) -> Router {
    let transfer_routes = Router::new()
        .route("/export", post(export))
        .route("/import", post(import))
        .layer(DefaultBodyLimit::max(IMPORT_BODY_LIMIT))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_auth))
        .route_layer(middleware::from_fn_with_state(state.clone(), user_auth));

    let kv_admin_routes = Router::new()
        .route("/batch", put(batch_update_kv))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_auth));
    let kv_routes = Router::new()
        .route("/keys", get(list_keys))
        .route("/value", post(create_kv))
        .route("/value/:b64key", get(get_kv).put(update_kv).delete(delete_kv))
        .route("/valuetype/:b64key", get(get_value_type).put(update_value_type))
        .merge(kv_admin_routes)
        .route_layer(middleware::from_fn_with_state(state.clone(), user_auth));

    let acl_user_routes = Router::new()
        .route("/tokens", get(list_tokens))
        .route("/token", post(create_token))
        .route("/token/:id", get(read_token).put(update_token).delete(delete_token))
        .route("/policies", get(list_policies))
        .route("/policy", post(create_policy))
        .route(
            "/policy/:b64name",
            get(read_policy).put(update_policy_rule).delete(delete_policy),
        )
        .route("/roles", get(list_roles))
        .route("/role", post(create_role))
        .route("/role/:b64name", get(read_role).put(update_role).delete(delete_role))
        .route_layer(middleware::from_fn_with_state(state.clone(), user_auth));
    let acl_routes = Router::new()
        .route("/hcl-rule", post(parse_rule))
        .merge(acl_user_routes);

    let api = Router::new()
        .route("/authenticate", post(authenticate))
        .merge(transfer_routes)
        .nest("/kv", kv_routes)
        .nest("/acl", acl_routes);

    Router::new()
        .nest("/api/v0", api)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any)
                .expose_headers([HeaderName::from_static(ERROR_HEADER)]),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
