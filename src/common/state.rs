// Application state shared across all modules

use std::sync::Arc;

use crate::auth::session::SessionIssuer;
use crate::common::config::AppConfig;
use crate::oauth::OAuthService;
use crate::storage::Storage;

/// Application state containing storage, services, and configuration
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub config: Arc<AppConfig>,
    pub sessions: Arc<SessionIssuer>,
    pub oauth_service: Arc<OAuthService>,
}
