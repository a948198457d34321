use std::sync::Arc;

use queuedesk_core::{
    AdminService, Config, DispatchEngine, EventHub, QueueEstimator, QueueStore,
};

/// Shared application state
pub struct AppState {
    engine: DispatchEngine,
    estimator: QueueEstimator,
    admin: AdminService,
    hub: EventHub,
}

impl AppState {
    /// Wire the core services around one store and one hub.
    pub fn new(config: &Config, store: Arc<dyn QueueStore>, hub: EventHub) -> Self {
        let store_timeout = config.dispatch.store_timeout();
        let engine = DispatchEngine::from_config(Arc::clone(&store), hub.clone(), config);
        let estimator =
            QueueEstimator::from_config(Arc::clone(&store), &config.estimator, &config.dispatch);
        let admin = AdminService::new(store, hub.clone(), store_timeout);

        Self {
            engine,
            estimator,
            admin,
            hub,
        }
    }

    pub fn engine(&self) -> &DispatchEngine {
        &self.engine
    }

    pub fn estimator(&self) -> &QueueEstimator {
        &self.estimator
    }

    pub fn admin(&self) -> &AdminService {
        &self.admin
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }
}
