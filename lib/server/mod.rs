use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::sync_service::types::Category;
use crate::sync_service::SyncService;

pub struct AppState {
    pub sync_service: SyncService,
    /// Shared secret for manually triggered syncs.
    pub api_key: String,
    pub shutdown_token: CancellationToken,
}

#[derive(Debug, Deserialize)]
struct SyncParams {
    users: Option<String>,
    categories: Option<String>,
}

async fn health_handler() -> &'static str {
    "Healthy"
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_categories(raw: Option<&str>) -> Result<Vec<Category>, String> {
    match raw {
        None => Ok(Vec::new()),
        Some(raw) => parse_list(raw)
            .iter()
            .map(|part| part.parse::<Category>())
            .collect(),
    }
}

fn report_response(outcome: Result<crate::sync_service::types::SyncReport, crate::sync_service::Error>) -> Response {
    match outcome {
        Ok(report) => {
            let status = if report.has_failures() {
                StatusCode::INTERNAL_SERVER_ERROR
            } else {
                StatusCode::OK
            };
            (status, Json(report)).into_response()
        }
        Err(err) => {
            error!(event = "sync_request_failed", error = %err, "sync run aborted");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

/// Manually triggered sync for an explicit user list. Requires the shared
/// API key; the full report is returned either way, with a 500 status when
/// any category failed so callers can alert on it.
async fn manual_sync_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<SyncParams>,
) -> Response {
    let presented = headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if presented != state.api_key {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid api key" })),
        )
            .into_response();
    }

    let users = params.users.as_deref().map(parse_list).unwrap_or_default();
    if users.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "query parameter `users` is required" })),
        )
            .into_response();
    }
    let categories = match parse_categories(params.categories.as_deref()) {
        Ok(categories) => categories,
        Err(message) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": message })),
            )
                .into_response();
        }
    };

    info!(
        event = "manual_sync_requested",
        user_count = users.len(),
        "manual sync triggered"
    );
    report_response(state.sync_service.run_sync(users, categories).await)
}

/// Scheduler-triggered sync across all registered users. Only reachable by
/// the platform scheduler, which stamps the `x-appengine-cron` header.
async fn cron_sync_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<SyncParams>,
) -> Response {
    let from_cron = headers
        .get("x-appengine-cron")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("true"));
    if !from_cron {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "scheduler-only endpoint" })),
        )
            .into_response();
    }

    let categories = match parse_categories(params.categories.as_deref()) {
        Ok(categories) => categories,
        Err(message) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": message })),
            )
                .into_response();
        }
    };

    info!(event = "cron_sync_requested", "scheduled sync triggered");
    report_response(state.sync_service.run_sync_all_users(categories).await)
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/sync", post(manual_sync_handler).get(cron_sync_handler))
        .with_state(state)
}

/// Starts the HTTP surface on the supplied socket address.
pub async fn setup_server_with_addr(
    state: Arc<AppState>,
    addr: SocketAddr,
) -> Result<tokio::task::JoinHandle<()>, std::io::Error> {
    let shutdown_token = state.shutdown_token.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(event = "server_listening", %addr, "HTTP surface ready");
    let server_handle = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_token.cancelled().await;
            })
            .await
        {
            error!(event = "server_exited", error = %err, "HTTP server stopped unexpectedly");
        }
    });

    Ok(server_handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_parsing_trims_and_drops_empties() {
        assert_eq!(parse_list("casey, jordan,,"), vec!["casey", "jordan"]);
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn category_parsing_accepts_known_names() {
        let parsed = parse_categories(Some("steps,heartrate")).expect("should parse");
        assert_eq!(parsed, vec![Category::Steps, Category::HeartRate]);
        assert!(parse_categories(None).expect("absent is fine").is_empty());
    }

    #[test]
    fn category_parsing_rejects_unknown_names() {
        let err = parse_categories(Some("steps,sleep")).expect_err("unknown should fail");
        assert!(err.contains("sleep"));
    }
}
