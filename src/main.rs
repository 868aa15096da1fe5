//! Relaydesk control plane API server
//!
//! Wires the middleware pipeline in its contractual order (credential
//! verification, tenant resolution, suspension check, authorization,
//! rate limiting) around the API routes and serves them over HTTP or
//! HTTPS.

use std::env;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use relaydesk::{api, config::LogFormat, db, middleware, AppConfig, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_help();
        return Ok(());
    }

    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        println!("Relaydesk {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = AppConfig::load().context("Failed to load configuration")?;
    init_logging(&config);

    info!("Relaydesk control plane starting up");

    let db = db::init_pool(&config.database)
        .await
        .context("Failed to initialize database")?;

    let state = AppState::new(config.clone(), db);

    // Reclaim idle rate-limit windows independently of request traffic.
    middleware::spawn_rate_limit_sweep(
        vec![state.rate_limit.clone(), state.strict_rate_limit.clone()],
        config.rate_limit.sweep_interval_secs,
    );

    let router = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    if let Some(ref tls) = config.server.tls {
        let rustls_config =
            axum_server::tls_rustls::RustlsConfig::from_pem_file(&tls.cert_file, &tls.key_file)
                .await
                .context("Failed to load TLS certificate")?;

        info!("Listening on https://{}", addr);
        axum_server::bind_rustls(addr, rustls_config)
            .serve(router.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .context("Server error")?;
    } else {
        info!("Listening on http://{}", addr);
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("Failed to bind server address")?;
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .context("Server error")?;
    }

    Ok(())
}

/// Assemble the router with the pipeline stages in order.
///
/// Layer ordering matters: the outermost layer runs first, so the
/// protected routes are wrapped suspension-first, then tenant, then
/// auth, giving the execution order auth → tenant → suspension →
/// per-route authorization → per-route rate limiting → handler.
fn create_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let protected = api::protected_routes(&state)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::suspension_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::tenant_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let api_router = api::public_routes(&state).merge(protected);

    Router::new()
        .nest("/api/v1", api_router)
        .with_state(state)
        .layer(trace_layer)
        .layer(cors)
}

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let registry = tracing_subscriber::registry().with(filter);

    match config.logging.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init(),
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact().with_target(false))
            .init(),
    }
}

fn print_help() {
    println!("Relaydesk control plane API server");
    println!();
    println!("USAGE:");
    println!("    relaydesk [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help       Print this help message");
    println!("    -V, --version    Print version information");
    println!();
    println!("CONFIGURATION:");
    println!("    Reads config.yaml from the working directory or the path in");
    println!("    RELAYDESK_CONFIG. Settings can be overridden with RELAYDESK_*");
    println!("    environment variables (HOST, PORT, JWT_SECRET, DATABASE_URL,");
    println!("    LOG_LEVEL).");
}
