use std::sync::Arc;

use ami_browser::BrowserSession;
use ami_domain::config::Config;
use ami_engine::TaskRegistry;
use ami_memory::client::MemoryProvider;
use ami_providers::ProviderRegistry;

use crate::settings::SettingsStore;

/// Shared application state passed to all API handlers.
///
/// Everything is constructed explicitly at daemon startup (see
/// `bootstrap`) and torn down with the process — no module-level
/// singletons.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<TaskRegistry>,
    pub providers: Arc<ProviderRegistry>,
    pub memory: Arc<dyn MemoryProvider>,
    /// `None` until a browser engine is configured; browser work then
    /// fails with a config error, nothing else does.
    pub browser: Option<Arc<BrowserSession>>,
    pub settings: Arc<SettingsStore>,
    /// SHA-256 of the API bearer token. `None` = local dev mode.
    pub api_token_hash: Option<Vec<u8>>,
}
