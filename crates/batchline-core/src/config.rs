use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BATCH_WINDOW_SECS: u64 = 10;
pub const DEFAULT_TTL_BUFFER_SECS: u64 = 60;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 300_000;
pub const DEFAULT_HEARTBEAT_VISIBILITY_EXTENSION_SECS: u64 = 600;
pub const DEFAULT_AI_POLL_INTERVAL_SECS: u64 = 1;
pub const DEFAULT_AI_POLL_TIMEOUT_SECS: u64 = 540;
pub const DEFAULT_QUEUE_MAX_RECEIVES: u32 = 5;
pub const DEFAULT_GATEWAY_PORT: u16 = 8080;
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Top-level config (`batchline.toml` + `BATCHLINE_*` env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchlineConfig {
    #[serde(default)]
    pub tables: TablesConfig,
    #[serde(default)]
    pub queues: QueuesConfig,
    #[serde(default)]
    pub batching: BatchingConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub queue: QueueEngineConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for BatchlineConfig {
    fn default() -> Self {
        Self {
            tables: TablesConfig::default(),
            queues: QueuesConfig::default(),
            batching: BatchingConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            ai: AiConfig::default(),
            queue: QueueEngineConfig::default(),
            gateway: GatewayConfig::default(),
            workers: WorkersConfig::default(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablesConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuesConfig {
    #[serde(default = "default_whatsapp_queue")]
    pub whatsapp: String,
    #[serde(default = "default_sms_queue")]
    pub sms: String,
    #[serde(default = "default_email_queue")]
    pub email: String,
    #[serde(default = "default_handoff_queue")]
    pub handoff: String,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            whatsapp: default_whatsapp_queue(),
            sms: default_sms_queue(),
            email: default_email_queue(),
            handoff: default_handoff_queue(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingConfig {
    #[serde(default = "default_batch_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_ttl_buffer_secs")]
    pub ttl_buffer_secs: u64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_BATCH_WINDOW_SECS,
            ttl_buffer_secs: DEFAULT_TTL_BUFFER_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_heartbeat_extension_secs")]
    pub visibility_extension_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            visibility_extension_secs: DEFAULT_HEARTBEAT_VISIBILITY_EXTENSION_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default = "default_ai_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_ai_poll_timeout")]
    pub poll_timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_AI_POLL_INTERVAL_SECS,
            poll_timeout_secs: DEFAULT_AI_POLL_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEngineConfig {
    #[serde(default = "default_max_receives")]
    pub max_receives: u32,
}

impl Default for QueueEngineConfig {
    fn default() -> Self {
        Self {
            max_receives: DEFAULT_QUEUE_MAX_RECEIVES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_GATEWAY_PORT,
            bind: default_gateway_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: DEFAULT_WORKER_COUNT,
        }
    }
}

fn default_db_path() -> String {
    "./batchline.db".to_string()
}
fn default_whatsapp_queue() -> String {
    "whatsapp".to_string()
}
fn default_sms_queue() -> String {
    "sms".to_string()
}
fn default_email_queue() -> String {
    "email".to_string()
}
fn default_handoff_queue() -> String {
    "handoff".to_string()
}
fn default_batch_window_secs() -> u64 {
    DEFAULT_BATCH_WINDOW_SECS
}
fn default_ttl_buffer_secs() -> u64 {
    DEFAULT_TTL_BUFFER_SECS
}
fn default_heartbeat_interval_ms() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_MS
}
fn default_heartbeat_extension_secs() -> u64 {
    DEFAULT_HEARTBEAT_VISIBILITY_EXTENSION_SECS
}
fn default_ai_poll_interval() -> u64 {
    DEFAULT_AI_POLL_INTERVAL_SECS
}
fn default_ai_poll_timeout() -> u64 {
    DEFAULT_AI_POLL_TIMEOUT_SECS
}
fn default_max_receives() -> u32 {
    DEFAULT_QUEUE_MAX_RECEIVES
}
fn default_gateway_port() -> u16 {
    DEFAULT_GATEWAY_PORT
}
fn default_gateway_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_worker_count() -> usize {
    DEFAULT_WORKER_COUNT
}
fn default_log_level() -> String {
    "info".to_string()
}

impl BatchlineConfig {
    /// Load config from a TOML file with `BATCHLINE_*` env var overrides.
    ///
    /// Checks, in order: explicit path argument, then `./batchline.toml`.
    /// Missing required values fail initialization rather than being
    /// discovered lazily on first request.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path.unwrap_or("batchline.toml");

        let config: BatchlineConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("BATCHLINE_").split("_"))
            .extract()
            .map_err(|e| crate::error::BatchlineError::Config(e.to_string()))?;

        Ok(config)
    }
}
