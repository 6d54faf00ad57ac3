//! Conversation endpoints.

use crate::{error::AppError, middleware::User, state::AppState};
use actix_web::{get, post, web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub participant_ids: Vec<Uuid>,
}

/// POST /api/v1/conversations
///
/// Returns the existing direct conversation when the pair already has one.
#[post("/api/v1/conversations")]
pub async fn create_conversation(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<CreateConversationRequest>,
) -> Result<HttpResponse, AppError> {
    let participant = match body.participant_ids.as_slice() {
        [only] => *only,
        _ => {
            return Err(AppError::Validation(
                "exactly one participant is required".into(),
            ))
        }
    };

    let summary = state
        .service
        .create_direct_conversation(user.id, participant)
        .await?;
    Ok(HttpResponse::Created().json(summary))
}

/// GET /api/v1/conversations
#[get("/api/v1/conversations")]
pub async fn list_conversations(
    state: web::Data<AppState>,
    user: User,
) -> Result<HttpResponse, AppError> {
    let summaries = state.service.list_conversations(user.id).await?;
    Ok(HttpResponse::Ok().json(summaries))
}

/// GET /api/v1/conversations/{id}
#[get("/api/v1/conversations/{id}")]
pub async fn get_conversation(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let summary = state
        .service
        .get_conversation_summary(user.id, conversation_id.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(summary))
}
