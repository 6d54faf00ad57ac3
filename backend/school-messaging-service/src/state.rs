use crate::{
    config::Config,
    repository::Repositories,
    services::ConversationService,
    websocket::{ConnectionRegistry, Dispatcher},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub service: ConversationService,
    pub registry: ConnectionRegistry,
    /// Shared by every live session.
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(config: Arc<Config>, repos: Repositories) -> Self {
        let service = ConversationService::new(repos);
        let registry = ConnectionRegistry::new();
        let dispatcher = Arc::new(Dispatcher::new(
            service.clone(),
            Arc::new(registry.clone()),
            config.session.dispatch_timeout,
        ));
        Self {
            config,
            service,
            registry,
            dispatcher,
        }
    }
}
