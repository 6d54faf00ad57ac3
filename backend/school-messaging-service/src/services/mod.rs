pub mod conversation_service;
pub mod events;

pub use conversation_service::ConversationService;
pub use events::{ConversationEvent, Emitted, EventPublisher};
