use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::{mpsc, watch};

use batchline_ai::{OpenAiAssistantsClient, PollConfig};
use batchline_core::config::BatchlineConfig;
use batchline_kv::KvStore;
use batchline_provider::TwilioClient;
use batchline_queue::{Delivery, QueueEngine, QueueHandle};
use batchline_secrets::HttpSecretsClient;
use batchline_stagea::{QueueNames, StageA};
use batchline_stageb::{ChannelQueues, StageB};

/// Everything an Axum handler needs: just the Stage A orchestrator and the
/// config it was built from (for e.g. the health check).
pub struct AppState {
    pub config: BatchlineConfig,
    pub stage_a: StageA,
}

/// Wires every collaborator crate together per SPEC_FULL.md's configuration
/// surface and hands back the pieces `main` needs to run the process:
/// the Axum state, the queue engine (its own tick loop), the delivery
/// receiver for the worker pool, and the `KvStore` the TTL reaper sweeps.
pub struct Wired {
    pub state: Arc<AppState>,
    pub queue_engine: QueueEngine,
    pub delivered_rx: mpsc::Receiver<Delivery>,
    pub stage_b: Arc<StageB>,
    pub channel_queues: ChannelQueues,
    pub kv: Arc<KvStore>,
}

/// Base URLs for the external collaborators. In a real deployment these
/// come from the environment alongside the secret store; SPEC_FULL.md scopes
/// secret *values* out of static config but the endpoints themselves are
/// not secrets.
pub struct Endpoints {
    pub secrets_base_url: String,
    pub ai_base_url: String,
    pub provider_base_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            secrets_base_url: std::env::var("BATCHLINE_SECRETS_URL")
                .unwrap_or_else(|_| "http://localhost:4000".to_string()),
            ai_base_url: std::env::var("BATCHLINE_AI_URL")
                .unwrap_or_else(|_| "https://api.openai.com".to_string()),
            provider_base_url: std::env::var("BATCHLINE_PROVIDER_URL")
                .unwrap_or_else(|_| "https://api.twilio.com".to_string()),
        }
    }
}

pub fn wire(config: BatchlineConfig, endpoints: Endpoints) -> anyhow::Result<Wired> {
    let kv_conn = Connection::open(&config.tables.path)?;
    let kv = Arc::new(KvStore::new(kv_conn)?);

    let queue_conn = Connection::open(&config.tables.path)?;
    let queue = Arc::new(QueueHandle::new(queue_conn)?);

    let engine_conn = Connection::open(&config.tables.path)?;
    let (delivered_tx, delivered_rx) = mpsc::channel(1024);
    let queue_engine = QueueEngine::new(
        engine_conn,
        delivered_tx,
        config.heartbeat.visibility_extension_secs,
    )?;

    let secrets = Arc::new(HttpSecretsClient::new(endpoints.secrets_base_url));
    let ai = Arc::new(OpenAiAssistantsClient::new(
        endpoints.ai_base_url,
        PollConfig {
            interval_secs: config.ai.poll_interval_secs,
            timeout_secs: config.ai.poll_timeout_secs,
        },
    ));
    let provider = Arc::new(TwilioClient::new(endpoints.provider_base_url));

    let queue_names = QueueNames {
        whatsapp: config.queues.whatsapp.clone(),
        sms: config.queues.sms.clone(),
        email: config.queues.email.clone(),
        handoff: config.queues.handoff.clone(),
    };
    let channel_queues = ChannelQueues {
        whatsapp: config.queues.whatsapp.clone(),
        sms: config.queues.sms.clone(),
        email: config.queues.email.clone(),
    };

    let stage_a = StageA::new(
        kv.clone(),
        queue.clone(),
        secrets.clone(),
        queue_names,
        config.batching.window_secs,
        config.batching.ttl_buffer_secs,
        config.queue.max_receives,
    );

    let stage_b = Arc::new(StageB::new(
        kv.clone(),
        queue.clone(),
        secrets,
        ai,
        provider,
        channel_queues.clone(),
        std::time::Duration::from_millis(config.heartbeat.interval_ms),
        config.heartbeat.visibility_extension_secs,
    ));

    let state = Arc::new(AppState { config, stage_a });

    Ok(Wired { state, queue_engine, delivered_rx, stage_b, channel_queues, kv })
}

/// Assemble the full Axum router (SPEC_FULL.md §8 "HTTP ingress").
pub fn build_router(state: Arc<AppState>) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/whatsapp", post(crate::http::webhook::whatsapp_handler))
        .route("/sms", post(crate::http::webhook::sms_handler))
        .route("/email", post(crate::http::webhook::email_handler))
        .route("/health", get(crate::http::health::health_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// A `watch`-channel-driven shutdown signal shared by every background
/// loop (queue engine tick, worker pool, TTL reaper), mirroring
/// `SchedulerEngine::run`'s shutdown contract.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}
