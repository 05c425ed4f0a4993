//! AppState construction: validate the home layout, initialize every
//! subsystem, and return a fully-wired state. Explicit construction at
//! startup, teardown with the process — tests build their own.

use std::sync::Arc;

use anyhow::Context;

use ami_browser::{BrowserSession, DisconnectedDriver};
use ami_domain::config::Config;
use ami_engine::TaskRegistry;
use ami_memory::client::{MemoryProvider, NullMemory, RestMemoryClient};
use ami_providers::ProviderRegistry;

use crate::auth::hash_token;
use crate::settings::SettingsStore;
use crate::state::AppState;

pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── home layout ──────────────────────────────────────────────────
    std::fs::create_dir_all(config.home.workspaces_dir())
        .context("creating workspaces directory")?;
    std::fs::create_dir_all(config.home.logs_dir()).context("creating logs directory")?;

    // ── settings & integrations ──────────────────────────────────────
    let settings = Arc::new(
        SettingsStore::open(config.home.settings_path(), config.home.integrations_path())
            .context("loading settings")?,
    );
    tracing::info!(path = %config.home.root.display(), "daemon home ready");

    // ── task registry ────────────────────────────────────────────────
    let registry = Arc::new(TaskRegistry::new(
        config.home.workspaces_dir(),
        config.tasks.clone(),
    ));

    // ── LLM providers ────────────────────────────────────────────────
    let providers = Arc::new(ProviderRegistry::from_config(&config.llm));
    if providers.is_empty() {
        tracing::info!("no LLM providers configured — tasks will fail until a key is set");
    } else {
        tracing::info!(providers = providers.len(), "LLM provider registry ready");
    }

    // ── memory client ────────────────────────────────────────────────
    let memory: Arc<dyn MemoryProvider> = if config.memory.api_key.is_some() {
        let client = RestMemoryClient::new(&config.memory).context("creating memory client")?;
        tracing::info!(url = %config.memory.base_url, "memory client ready");
        Arc::new(client)
    } else {
        tracing::info!("no memory credentials — running without workflow memory");
        Arc::new(NullMemory)
    };

    // ── browser session ──────────────────────────────────────────────
    // The CDP transport is an external collaborator; until one is
    // wired in, a disconnected driver makes browser tools fail with a
    // config error while everything else keeps working.
    let cdp_port = config
        .browser
        .cdp_port
        .or_else(|| std::env::var("AMI_CDP_PORT").ok().and_then(|p| p.parse().ok()));
    let browser = Some(Arc::new(BrowserSession::new(
        Arc::new(DisconnectedDriver),
        config.browser.page_pool_size,
    )));
    match cdp_port {
        Some(port) => tracing::info!(port, "browser CDP port configured"),
        None => tracing::info!("no browser CDP port configured — browser tools disabled"),
    }

    // ── auth ─────────────────────────────────────────────────────────
    let api_token_hash = config.server.api_token.as_deref().map(hash_token);
    if api_token_hash.is_none() {
        tracing::info!("no API token configured — cloud endpoints run unauthenticated");
    }

    Ok(AppState {
        config,
        registry,
        providers,
        memory,
        browser,
        settings,
        api_token_hash,
    })
}
