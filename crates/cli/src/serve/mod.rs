//! `paraf serve` -- HTTP JSON API for the procurement approval engine.
//!
//! Exposes the rule repository, letter workflow, projections, and
//! directory over `axum` + `tokio` on the in-memory backend.
//!
//! Security:
//! - Actor identity per request via `X-Actor-Id` on everything under /admin
//! - CORS headers on all responses (permissive for local dev)
//! - Per-IP rate limiting (default: 60 req/min, configurable)
//! - Optional API key authentication via PARAF_API_KEY env var
//!
//! Public endpoints:
//! - GET /health                - liveness probe (exempt from auth)
//! - GET /progress/{id}         - letter timeline for the tracking link
//! - GET /letters/{file_name}   - stored letter PDF
//!
//! Everything else lives under /admin and requires a resolvable actor.

mod admin;
mod files;
mod handlers;
mod middleware;
mod state;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::routing::{get, post, put};
use axum::{middleware as axum_middleware, Router};
use paraf_storage::MemoryStore;
use tower_http::cors::{Any, CorsLayer};

use self::files::LetterFileStore;
use self::handlers::{handle_health, handle_letter_file, handle_not_found, handle_progress};
use self::middleware::{actor_middleware, auth_middleware, rate_limit_middleware};
use self::state::{AppState, RateLimiter};

/// Maximum request body size: 10 MB (letter PDF cap is 5 MB, checked
/// separately by the file store).
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Default rate limit: 60 requests per minute per IP.
const DEFAULT_RATE_LIMIT: u64 = 60;

/// Rate limit window duration in seconds (1 minute).
const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Start the HTTP server on the given port.
pub async fn start_server(
    port: u16,
    letters_dir: PathBuf,
    seed_path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = MemoryStore::new();

    if let Some(path) = seed_path {
        let file = crate::seed::parse(path)?;
        let summary = crate::seed::load(&store, &file).await?;
        eprintln!(
            "Seeded {} role(s), {} unit(s), {} user(s), {} rule(s) from {}",
            summary.roles,
            summary.units,
            summary.users,
            summary.rules,
            path.display()
        );
    }

    let letter_files = LetterFileStore::new(letters_dir);
    letter_files.init().await?;

    // Rate limit: from PARAF_RATE_LIMIT env var, or default
    let rate_limit = std::env::var("PARAF_RATE_LIMIT")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_RATE_LIMIT);

    // API key: from PARAF_API_KEY env var (None = no auth)
    let api_key = std::env::var("PARAF_API_KEY")
        .ok()
        .filter(|k| !k.is_empty());

    if api_key.is_some() {
        eprintln!("API key authentication enabled");
    }
    eprintln!("Rate limit: {} requests per minute per IP", rate_limit);
    eprintln!("Letter files: {}", letter_files.dir().display());

    let state = Arc::new(AppState {
        store,
        files: letter_files,
        rate_limiter: RateLimiter::new(rate_limit),
        api_key,
    });

    // CORS: permissive for local dev
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    let admin = Router::new()
        .route(
            "/procurements",
            post(admin::handle_submit).get(admin::handle_list_letters),
        )
        .route("/procurements/history", get(admin::handle_history))
        .route(
            "/procurements/{id}",
            get(admin::handle_get_letter).put(admin::handle_resubmit),
        )
        .route("/procurements/decision/{id}", post(admin::handle_decision))
        .route("/dashboard", get(admin::handle_dashboard))
        .route(
            "/rules",
            get(admin::handle_list_rules).post(admin::handle_create_rule),
        )
        .route(
            "/rules/{id}",
            get(admin::handle_get_rule)
                .put(admin::handle_update_rule)
                .delete(admin::handle_delete_rule),
        )
        .route("/rules/step/{id}", put(admin::handle_update_rule_steps))
        .route(
            "/units",
            get(admin::handle_list_units).post(admin::handle_create_unit),
        )
        .route("/units/{id}", get(admin::handle_get_unit))
        .route(
            "/roles",
            get(admin::handle_list_roles).post(admin::handle_create_role),
        )
        .route("/roles/{id}", get(admin::handle_get_role))
        .route(
            "/users",
            get(admin::handle_list_users).post(admin::handle_create_user),
        )
        .route("/users/{id}", get(admin::handle_get_user))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            actor_middleware,
        ));

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/progress/{id}", get(handle_progress))
        .route("/letters/{file_name}", get(handle_letter_file))
        .nest("/admin", admin)
        .fallback(handle_not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    eprintln!("Procurement API listening on http://0.0.0.0:{}", port);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    eprintln!("\nServer shut down.");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => eprintln!("\nReceived shutdown signal..."),
        Err(e) => eprintln!("\nShutdown signal handler failed: {}", e),
    }
}
