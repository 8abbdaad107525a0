use crate::agent::Agent;
use crate::config::AppConfig;
use crate::db::executor::QueryExecutor;
use crate::llm::LlmManager;
use std::sync::Arc;

/// Shared application state for the web server. Everything in here is
/// read-only after startup, so concurrent turns and alert evaluations need
/// no coordination.
pub struct AppState {
    pub config: AppConfig,
    pub executor: Arc<QueryExecutor>,
    pub agent: Agent,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(config: AppConfig, executor: Arc<QueryExecutor>, llm: Arc<LlmManager>) -> Self {
        let agent = Agent::new(llm, Arc::clone(&executor));
        Self {
            config,
            executor,
            agent,
            startup_time: chrono::Utc::now(),
        }
    }
}
