use crate::core::config::AppConfig;
use crate::core::rbac::PolicyTable;
use crate::learn::events::{EventBus, LearnEvent};
use crate::core::shared::utils::DbPool;
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct AppState {
    pub conn: DbPool,
    pub config: Arc<AppConfig>,
    pub policy: Arc<PolicyTable>,
    pub events: EventBus,
}

impl AppState {
    pub fn new(conn: DbPool, config: AppConfig) -> Self {
        let policy = PolicyTable::from_grants(&config.policy.roles);
        Self {
            conn,
            config: Arc::new(config),
            policy: Arc::new(policy),
            events: EventBus::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LearnEvent> {
        self.events.subscribe()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("pool_state", &self.conn.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
