pub mod api;
pub mod auth;
pub mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use libwsctl::{
    MemoryBackend, SessionBackend, TaskStore, TaskSupervisor, TmuxBackend, TokenAuthority,
};

pub use api::{ApiError, AppState, router};
pub use auth::{AuthMode, Authorizer};
pub use config::{BackendKind, Cli, Config};

/// Wire the supervisor, backend and authorizer described by `config`.
pub fn build_state(config: &Config) -> Result<Arc<AppState>> {
    let store = TaskStore::open(&config.tasks_root)
        .with_context(|| format!("failed to open tasks root {}", config.tasks_root.display()))?;

    let backend: Arc<dyn SessionBackend> = match config.backend {
        BackendKind::Tmux => Arc::new(TmuxBackend::new(config.command_timeout)),
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
    };

    let supervisor = TaskSupervisor::new(store, backend, config.supervisor_config());
    let tokens = TokenAuthority::new(&config.token_path);
    let authorizer = Authorizer::new(&config.proxy_headers, tokens)?;
    Ok(Arc::new(AppState::new(supervisor, authorizer)))
}
