//! Message endpoints. Mutations are broadcast to live sessions after the
//! write succeeds.

use crate::{
    error::AppError,
    middleware::User,
    models::MessageDraft,
    services::EventPublisher,
    state::AppState,
};
use actix_web::{get, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub before_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub message_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub message_id: Uuid,
    pub marked: u64,
}

/// POST /api/v1/conversations/{id}/messages
#[post("/api/v1/conversations/{id}/messages")]
pub async fn send_message(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    body: web::Json<MessageDraft>,
) -> Result<HttpResponse, AppError> {
    let emitted = state
        .service
        .send_message(user.id, conversation_id.into_inner(), body.into_inner())
        .await?;
    state.registry.publish(emitted.event).await;
    Ok(HttpResponse::Created().json(emitted.value))
}

/// GET /api/v1/conversations/{id}/messages?limit=&before_id=
///
/// Oldest first within the page. An explicit limit must be positive; larger values are
/// capped by the service.
#[get("/api/v1/conversations/{id}/messages")]
pub async fn get_messages(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, AppError> {
    let HistoryQuery { limit, before_id } = query.into_inner();
    if matches!(limit, Some(n) if n <= 0) {
        return Err(AppError::Validation("limit must be positive".into()));
    }

    let messages = state
        .service
        .list_messages(user.id, conversation_id.into_inner(), limit, before_id)
        .await?;
    Ok(HttpResponse::Ok().json(messages))
}

/// POST /api/v1/conversations/{id}/read
#[post("/api/v1/conversations/{id}/read")]
pub async fn mark_read(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    body: web::Json<MarkReadRequest>,
) -> Result<HttpResponse, AppError> {
    let message_id = body.message_id;
    let emitted = state
        .service
        .mark_read(user.id, conversation_id.into_inner(), message_id)
        .await?;
    state.registry.publish(emitted.event).await;
    Ok(HttpResponse::Ok().json(MarkReadResponse {
        message_id,
        marked: emitted.value,
    }))
}
