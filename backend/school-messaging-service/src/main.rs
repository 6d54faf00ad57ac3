use actix_web::{web, App, HttpServer};
use anyhow::Context;
use school_messaging_service::{
    config::{self, StorageBackend},
    db, logging,
    repository::{MemoryStore, PgStore, Repositories},
    routes,
    state::AppState,
};
use std::sync::Arc;
use tracing_actix_web::TracingLogger;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let repos = match cfg.storage {
        StorageBackend::Postgres => {
            let pool = db::init_pool(&cfg.db)
                .await
                .context("failed to initialize database")?;
            Repositories::from_store(Arc::new(PgStore::new(pool)))
        }
        StorageBackend::Memory => {
            tracing::warn!("using in-memory storage; data is lost on restart");
            Repositories::from_store(Arc::new(MemoryStore::new()))
        }
    };

    let state = AppState::new(cfg.clone(), repos);

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, storage = ?cfg.storage, "starting school-messaging-service");

    HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure)
    })
    .bind(&bind_addr)
    .with_context(|| format!("failed to bind {bind_addr}"))?
    .run()
    .await
    .context("http server failed")
}
