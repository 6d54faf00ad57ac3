use actix_web::{web, HttpResponse};

pub mod conversations;
pub mod messages;
pub mod wsroute;

/// Mounts every route on an app. `AppState` must already be in app data.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(conversations::create_conversation)
        .service(conversations::list_conversations)
        .service(conversations::get_conversation)
        .service(messages::send_message)
        .service(messages::get_messages)
        .service(messages::mark_read)
        .service(wsroute::stream)
        .route("/health", web::get().to(health));
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}
