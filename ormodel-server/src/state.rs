//! Shared application state

use std::sync::Arc;

use ormodel_core::Database;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
}

impl AppState {
    pub fn new(db: Database) -> Arc<Self> {
        Arc::new(Self { db })
    }
}
