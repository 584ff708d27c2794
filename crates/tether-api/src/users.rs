use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{error, warn};
use uuid::Uuid;

use tether_types::api::{Claims, SearchResult};
use tether_types::models::ConnectionStatus;

use crate::auth::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub query: String,
}

/// Username fragment search, excluding the caller, each hit annotated with
/// the pair's connection status.
pub async fn search_users(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    if params.query.is_empty() {
        return Ok(Json(vec![]));
    }

    let db = state.db.clone();
    let self_id = claims.sub;
    let fragment = params.query;

    let rows = tokio::task::spawn_blocking(move || db.search_users(self_id, &fragment))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let results: Vec<SearchResult> = rows
        .into_iter()
        .map(|row| SearchResult {
            id: row.id.parse().unwrap_or_else(|e| {
                warn!("Corrupt user id '{}': {}", row.id, e);
                Uuid::default()
            }),
            username: row.username,
            connection_status: row
                .connection_status
                .as_deref()
                .and_then(ConnectionStatus::parse),
        })
        .collect();

    Ok(Json(results))
}
