use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use config::builder::DefaultState;
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: u32,
    /// Path the stateless command endpoint is mounted on.
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebSocketConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub send_queue_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Sessions idle longer than this are dropped. Zero disables eviction.
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allow_any_origin: bool,
    pub max_age: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BoardConfig {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub environment: String,
    pub server: ServerConfig,
    pub websocket: WebSocketConfig,
    pub session: SessionConfig,
    pub cors: CorsConfig,
    pub board: BoardConfig,
}

fn defaults(environment: &str) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("environment", environment)?
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", 8080)?
        .set_default("server.workers", num_cpus::get() as i64)?
        .set_default("server.path", "/bbs")?
        .set_default("websocket.enabled", true)?
        .set_default("websocket.host", "127.0.0.1")?
        .set_default("websocket.port", 8081)?
        .set_default("websocket.send_queue_size", 10)?
        .set_default("session.idle_timeout_secs", 3600)?
        .set_default("session.sweep_interval_secs", 60)?
        .set_default("cors.enabled", true)?
        .set_default("cors.allow_any_origin", true)?
        .set_default("cors.max_age", 3600)?
        .set_default("board.name", "BBS")?
        .set_default("board.description", "A bulletin board")
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        defaults("development")?
            // Add in settings from the config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // E.g., `APP_SERVER__PORT=5001` would set `Settings.server.port`
            .add_source(
                Environment::with_prefix("app")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Defaults only, with the listeners bound to ephemeral ports.
    pub fn new_for_test() -> Result<Self, ConfigError> {
        defaults("test")?
            .set_override("server.port", 0)?
            .set_override("server.workers", 1)?
            .set_override("websocket.port", 0)?
            .set_override("board.name", "test")?
            .build()?
            .try_deserialize()
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn websocket_addr(&self) -> String {
        format!("{}:{}", self.websocket.host, self.websocket.port)
    }
}
