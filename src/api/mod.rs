// API module - HTTP endpoints

use std::sync::Arc;

use crate::config::Config;
use crate::store::InventoryStore;

pub mod health;
pub mod operations;
pub mod payments;
pub mod reservations;
pub mod tiers;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn InventoryStore>,
    pub config: Config,
}
