use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::message_types::{InboundEvent, OutboundEvent, RawEnvelope};
use super::session::SessionHandle;
use crate::error::AppError;
use crate::services::events::{ConversationEvent, EventPublisher};
use crate::services::ConversationService;

/// Turns inbound envelopes into service calls.
///
/// Success acks the originating session and then publishes the domain
/// event to the whole conversation. Any failure becomes an `error` frame
/// for the originating session only.
pub struct Dispatcher {
    service: ConversationService,
    publisher: Arc<dyn EventPublisher>,
    timeout: Duration,
}

struct Handled {
    ack: OutboundEvent,
    event: ConversationEvent,
}

impl Dispatcher {
    pub fn new(
        service: ConversationService,
        publisher: Arc<dyn EventPublisher>,
        timeout: Duration,
    ) -> Self {
        Self {
            service,
            publisher,
            timeout,
        }
    }

    pub async fn dispatch(&self, session: &Arc<SessionHandle>, envelope: RawEnvelope) {
        let event_type = envelope.event_type.clone();
        let outcome = tokio::time::timeout(
            self.timeout,
            self.handle(session.account_id(), session.conversation_id(), envelope),
        )
        .await
        .unwrap_or_else(|_| Err("request timed out".to_string()));

        match outcome {
            Ok(Handled { ack, event }) => {
                if let Err(e) = session.send(&ack) {
                    tracing::debug!(session_id = %session.id(), error = %e, "ack not delivered");
                }
                self.publisher.publish(event).await;
            }
            Err(message) => {
                tracing::debug!(
                    session_id = %session.id(),
                    event_type = %event_type,
                    reason = %message,
                    "rejected inbound event"
                );
                let _ = session.send(&OutboundEvent::error(message));
            }
        }
    }

    async fn handle(
        &self,
        account_id: Uuid,
        conversation_id: Uuid,
        envelope: RawEnvelope,
    ) -> Result<Handled, String> {
        match InboundEvent::decode(envelope).map_err(|e| e.to_string())? {
            InboundEvent::ConversationRead(request) => {
                let message_id = request
                    .message_id
                    .ok_or_else(|| "message_id required".to_string())?;
                let emitted = self
                    .service
                    .mark_read(account_id, conversation_id, message_id)
                    .await
                    .map_err(|e| read_error(&e))?;
                Ok(Handled {
                    ack: OutboundEvent::ConversationReadAck { message_id },
                    event: emitted.event,
                })
            }
            InboundEvent::MessageCreate(draft) => {
                let emitted = self
                    .service
                    .send_message(account_id, conversation_id, draft)
                    .await
                    .map_err(|e| create_error(&e))?;
                Ok(Handled {
                    ack: OutboundEvent::MessageCreateAck(emitted.value),
                    event: emitted.event,
                })
            }
        }
    }
}

fn read_error(err: &AppError) -> String {
    match err {
        AppError::Forbidden => "not allowed to mark read".into(),
        AppError::NotFound => "conversation or message not found".into(),
        AppError::Validation(msg) | AppError::Invalid(msg) => msg.clone(),
        other => {
            tracing::warn!(error = %other, "mark read failed");
            "unable to mark read".into()
        }
    }
}

fn create_error(err: &AppError) -> String {
    match err {
        AppError::Forbidden => "not allowed to send message".into(),
        AppError::NotFound => "conversation not found".into(),
        AppError::Validation(msg) | AppError::Invalid(msg) => msg.clone(),
        other => {
            tracing::warn!(error = %other, "send message failed");
            "unable to send message".into()
        }
    }
}
