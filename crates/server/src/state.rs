use std::sync::Arc;

use tabload_core::Config;
use tabload_storage::ProductStore;

use crate::bulk::{JobRegistry, JobRunner};

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn ProductStore>,
    pub registry: Arc<JobRegistry>,
    pub runner: JobRunner,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn ProductStore>, runner: JobRunner) -> Self {
        Self {
            config,
            store,
            registry: runner.registry().clone(),
            runner,
        }
    }
}
