use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use tether_db::{AcceptOutcome, RejectOutcome, RequestOutcome};
use tether_types::api::{Claims, InvitationOutcome, InvitationResponse, PendingInvitation};

use crate::auth::AppState;

/// File a connection request to another user. A record for the pair in
/// either direction makes this a distinguishable no-op, not an error.
pub async fn send_invitation(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let requester = claims.sub;

    let outcome = tokio::task::spawn_blocking(move || db.request_connection(requester, user_id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let status = match outcome {
        RequestOutcome::Created(row) => {
            info!(
                "{} ({}) invited {} (connection {})",
                claims.username, requester, user_id, row.id
            );
            InvitationOutcome::Success
        }
        RequestOutcome::AlreadyExists => InvitationOutcome::Exists,
    };

    Ok(Json(InvitationResponse { status }))
}

/// Accept a pending invitation. Only the invitee may do this.
pub async fn accept_invitation(
    State(state): State<AppState>,
    Path(connection_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let acting = claims.sub;

    let outcome = tokio::task::spawn_blocking(move || db.accept_connection(connection_id, acting))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    match outcome {
        AcceptOutcome::Accepted => Ok(Json(InvitationResponse {
            status: InvitationOutcome::Success,
        })),
        AcceptOutcome::Forbidden => Err(StatusCode::FORBIDDEN),
        AcceptOutcome::NotFound => Err(StatusCode::NOT_FOUND),
    }
}

/// Reject a pending invitation by deleting it. Only the invitee may do
/// this; the pair can be re-invited afterwards.
pub async fn reject_invitation(
    State(state): State<AppState>,
    Path(connection_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let acting = claims.sub;

    let outcome = tokio::task::spawn_blocking(move || db.reject_connection(connection_id, acting))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    match outcome {
        RejectOutcome::Removed => Ok(Json(InvitationResponse {
            status: InvitationOutcome::Success,
        })),
        RejectOutcome::Forbidden => Err(StatusCode::FORBIDDEN),
        RejectOutcome::NotFound => Err(StatusCode::NOT_FOUND),
    }
}

/// Incoming pending invitations for the caller, oldest first.
pub async fn get_pending_invitations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub;

    let rows = tokio::task::spawn_blocking(move || db.pending_for(user_id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let invitations: Vec<PendingInvitation> = rows
        .into_iter()
        .map(|row| PendingInvitation {
            id: row.id,
            sender_id: row.sender_id.parse().unwrap_or_else(|e| {
                warn!("Corrupt sender id '{}' on connection {}: {}", row.sender_id, row.id, e);
                Uuid::default()
            }),
            sender_username: row.sender_username,
            timestamp: tether_db::models::parse_timestamp(&row.created_at).unwrap_or_else(|e| {
                warn!("Corrupt created_at on connection {}: {}", row.id, e);
                chrono::DateTime::default()
            }),
        })
        .collect();

    Ok(Json(invitations))
}
