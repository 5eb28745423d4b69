use std::sync::Arc;

use crate::config::Settings;
use crate::database::db::DbPool;
use crate::generation::{GenerationRegistry, GenerationSupervisor};
use crate::llm::ModelClient;

/// Shared per-process state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub registry: GenerationRegistry,
    pub supervisor: GenerationSupervisor,
    pub model: Arc<dyn ModelClient>,
    pub settings: Arc<Settings>,
}
