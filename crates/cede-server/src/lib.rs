use std::sync::Arc;

use cede_analysis::EngineClient;
use cede_history::HistoryRepository;

mod http;

pub use http::{app_router, serve};

/// Shared state behind the history API. The ledger is held through the
/// repository trait, so the backing store is swappable.
#[derive(Clone)]
pub struct AppState {
    pub history: Arc<dyn HistoryRepository>,
    pub engine: EngineClient,
}

impl AppState {
    pub fn new(history: Arc<dyn HistoryRepository>, engine: EngineClient) -> Self {
        Self { history, engine }
    }
}
