use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use libwsctl::SupervisorConfig;
use serde::Deserialize;

const DEFAULT_LISTEN: &str = "127.0.0.1:8788";
const DEFAULT_TASKS_DIR: &str = ".claude-tasks";
const DEFAULT_TOKEN_FILE: &str = ".claude-api-token";
const DEFAULT_SETTLE_DELAY_MS: u64 = 3_000;
const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_PROXY_HEADERS: [&str; 2] = ["Remote-User", "X-Forwarded-User"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Tmux,
    Memory,
}

#[derive(Debug, Default, Parser)]
#[command(name = "wsctl-web", about = "HTTP supervisor for assistant sessions running in tmux")]
pub struct Cli {
    /// TOML config file; flags override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub listen: Option<SocketAddr>,
    #[arg(long)]
    pub tasks_root: Option<PathBuf>,
    #[arg(long)]
    pub token_path: Option<PathBuf>,
    #[arg(long)]
    pub default_workdir: Option<PathBuf>,
    #[arg(long)]
    pub assistant_command: Option<String>,
    #[arg(long)]
    pub settle_delay_ms: Option<u64>,
    #[arg(long)]
    pub command_timeout_ms: Option<u64>,
    /// Header set by the authenticating reverse proxy (repeatable).
    #[arg(long = "proxy-header")]
    pub proxy_headers: Vec<String>,
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,
    /// CORS origin to allow (repeatable, `*` for any).
    #[arg(long = "allow-origin")]
    pub allow_origins: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub listen: Option<SocketAddr>,
    pub tasks_root: Option<PathBuf>,
    pub token_path: Option<PathBuf>,
    pub default_workdir: Option<PathBuf>,
    pub assistant_command: Option<String>,
    pub settle_delay_ms: Option<u64>,
    pub command_timeout_ms: Option<u64>,
    pub proxy_headers: Option<Vec<String>>,
    pub backend: Option<BackendKind>,
    pub allow_origins: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub tasks_root: PathBuf,
    pub token_path: PathBuf,
    pub default_workdir: PathBuf,
    pub assistant_command: String,
    pub settle_delay: Duration,
    pub command_timeout: Duration,
    pub proxy_headers: Vec<String>,
    pub backend: BackendKind,
    pub allow_origins: Vec<String>,
}

impl Config {
    pub fn load(cli: &Cli) -> Result<Self> {
        let file_cfg = match &cli.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                toml::from_str::<FileConfig>(&raw)
                    .with_context(|| format!("failed to parse config {}", path.display()))?
            }
            None => FileConfig::default(),
        };
        let home = std::env::var("HOME").context("HOME env var not set")?;
        Self::resolve(cli, file_cfg, Path::new(&home))
    }

    /// Merge flags over the file config over built-in defaults.
    pub fn resolve(cli: &Cli, file_cfg: FileConfig, home: &Path) -> Result<Self> {
        let listen = match cli.listen.or(file_cfg.listen) {
            Some(addr) => addr,
            None => DEFAULT_LISTEN.parse().context("invalid default listen address")?,
        };
        let proxy_headers = if !cli.proxy_headers.is_empty() {
            cli.proxy_headers.clone()
        } else {
            file_cfg
                .proxy_headers
                .unwrap_or_else(|| DEFAULT_PROXY_HEADERS.iter().map(|h| h.to_string()).collect())
        };
        let allow_origins = if !cli.allow_origins.is_empty() {
            cli.allow_origins.clone()
        } else {
            file_cfg.allow_origins.unwrap_or_default()
        };

        Ok(Self {
            listen,
            tasks_root: cli
                .tasks_root
                .clone()
                .or(file_cfg.tasks_root)
                .unwrap_or_else(|| home.join(DEFAULT_TASKS_DIR)),
            token_path: cli
                .token_path
                .clone()
                .or(file_cfg.token_path)
                .unwrap_or_else(|| home.join(DEFAULT_TOKEN_FILE)),
            default_workdir: cli
                .default_workdir
                .clone()
                .or(file_cfg.default_workdir)
                .unwrap_or_else(|| home.to_path_buf()),
            assistant_command: cli
                .assistant_command
                .clone()
                .or(file_cfg.assistant_command)
                .unwrap_or_else(|| libwsctl::supervisor::DEFAULT_ASSISTANT_COMMAND.to_string()),
            settle_delay: Duration::from_millis(
                cli.settle_delay_ms
                    .or(file_cfg.settle_delay_ms)
                    .unwrap_or(DEFAULT_SETTLE_DELAY_MS),
            ),
            command_timeout: Duration::from_millis(
                cli.command_timeout_ms
                    .or(file_cfg.command_timeout_ms)
                    .unwrap_or(DEFAULT_COMMAND_TIMEOUT_MS),
            ),
            proxy_headers,
            backend: cli.backend.or(file_cfg.backend).unwrap_or(BackendKind::Tmux),
            allow_origins,
        })
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        let mut cfg = SupervisorConfig::new(&self.default_workdir);
        cfg.assistant_command = self.assistant_command.clone();
        cfg.settle_delay = self.settle_delay;
        cfg
    }
}
