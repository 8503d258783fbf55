use crate::{config::Config, gateway::ChatGateway};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<ChatGateway>,
    pub config: Arc<Config>,
}
