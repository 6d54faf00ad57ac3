//! Live stream upgrade.
//!
//! Auth and membership are checked and the snapshot is loaded before the
//! upgrade, so a refused client gets a plain HTTP status instead of a
//! socket that closes immediately.

use crate::{
    error::AppError,
    middleware::StreamUser,
    state::AppState,
    websocket::{message_types::OutboundEvent, session::ClientSession, transport},
};
use actix_web::{get, web, HttpRequest, HttpResponse};
use uuid::Uuid;

/// GET /api/v1/conversations/{id}/stream?token=
#[get("/api/v1/conversations/{id}/stream")]
pub async fn stream(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
    StreamUser(user): StreamUser,
    conversation_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let conversation_id = conversation_id.into_inner();
    let cfg = &state.config.session;

    let snapshot = state
        .service
        .snapshot(user.id, conversation_id, cfg.snapshot_history)
        .await?;
    let snapshot = OutboundEvent::Snapshot(snapshot).to_text().map_err(|e| {
        tracing::error!(%conversation_id, error = %e, "failed to encode snapshot");
        AppError::Internal
    })?;

    let (response, sink, frames) = actix_ws::handle(&req, body).map_err(|e| {
        tracing::debug!(error = %e, "websocket handshake rejected");
        AppError::Validation("websocket upgrade required".into())
    })?;

    let session = ClientSession {
        account_id: user.id,
        conversation_id,
        config: cfg.clone(),
        registry: state.registry.clone(),
        dispatcher: state.dispatcher.clone(),
    };
    let source = transport::frames(frames);

    actix_web::rt::spawn(async move {
        if let Err(e) = session.run(snapshot, sink, source).await {
            tracing::debug!(%conversation_id, error = %e, "session ended before start");
        }
    });

    Ok(response)
}
