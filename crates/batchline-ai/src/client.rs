use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::error::{AiError, Result};
use crate::types::{AiReply, PollConfig};

const OPENAI_BETA_HEADER: &str = "assistants=v2";

/// Given `(thread_id, assistant_id, user_text, api_key)` return a completed
/// reply or a classified error. One call runs the full thread/run/poll cycle.
#[async_trait]
pub trait AiClient: Send + Sync {
    async fn process_reply(
        &self,
        thread_id: &str,
        assistant_id: &str,
        user_text: &str,
        api_key: &str,
    ) -> Result<AiReply>;
}

/// OpenAI Assistants API client, adapted from single-shot chat completions
/// (as in `skynet-agent::openai::OpenAiProvider`) to the thread/run/poll
/// cycle `openai_service.process_reply_with_ai` drives.
pub struct OpenAiAssistantsClient {
    http: reqwest::Client,
    base_url: String,
    poll: PollConfig,
}

impl OpenAiAssistantsClient {
    pub fn new(base_url: impl Into<String>, poll: PollConfig) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into(), poll }
    }
}

#[derive(Debug, Deserialize)]
struct CreatedMessage {
    #[allow(dead_code)]
    id: String,
}

#[derive(Debug, Deserialize)]
struct Run {
    id: String,
    status: String,
    #[serde(default)]
    last_error: Option<serde_json::Value>,
    #[serde(default)]
    usage: Option<RunUsage>,
}

#[derive(Debug, Deserialize)]
struct RunUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    data: Vec<ThreadMessage>,
}

#[derive(Debug, Deserialize)]
struct ThreadMessage {
    id: String,
    role: String,
    #[serde(default)]
    run_id: Option<String>,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<TextValue>,
}

#[derive(Debug, Deserialize)]
struct TextValue {
    value: String,
}

#[async_trait]
impl AiClient for OpenAiAssistantsClient {
    async fn process_reply(
        &self,
        thread_id: &str,
        assistant_id: &str,
        user_text: &str,
        api_key: &str,
    ) -> Result<AiReply> {
        if thread_id.is_empty() || assistant_id.is_empty() || user_text.is_empty() || api_key.is_empty() {
            return Err(AiError::InvalidInput(
                "missing required arguments for AI processing".into(),
            ));
        }

        info!(%thread_id, %assistant_id, "starting AI reply processing");

        self.append_user_message(thread_id, user_text, api_key).await?;
        let run_id = self.start_run(thread_id, assistant_id, api_key).await?;
        let run = self.poll_run(thread_id, &run_id, api_key).await?;
        let content = self.extract_reply(thread_id, &run_id, api_key).await?;

        let usage = run.usage.unwrap_or(RunUsage { prompt_tokens: 0, completion_tokens: 0, total_tokens: 0 });
        info!(
            %thread_id, run_id = %run_id, prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens, "AI reply processing succeeded"
        );

        Ok(AiReply {
            content,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        })
    }
}

impl OpenAiAssistantsClient {
    async fn append_user_message(&self, thread_id: &str, user_text: &str, api_key: &str) -> Result<()> {
        let url = format!("{}/v1/threads/{}/messages", self.base_url, thread_id);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .header("OpenAI-Beta", OPENAI_BETA_HEADER)
            .json(&serde_json::json!({ "role": "user", "content": user_text }))
            .send()
            .await
            .map_err(classify_transport)?;

        let _: CreatedMessage = classify_response(resp).await?;
        Ok(())
    }

    async fn start_run(&self, thread_id: &str, assistant_id: &str, api_key: &str) -> Result<String> {
        let url = format!("{}/v1/threads/{}/runs", self.base_url, thread_id);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .header("OpenAI-Beta", OPENAI_BETA_HEADER)
            .json(&serde_json::json!({ "assistant_id": assistant_id }))
            .send()
            .await
            .map_err(classify_transport)?;

        let run: Run = classify_response(resp).await?;
        debug!(run_id = %run.id, status = %run.status, "run created");
        Ok(run.id)
    }

    async fn poll_run(&self, thread_id: &str, run_id: &str, api_key: &str) -> Result<Run> {
        let start = Instant::now();
        let timeout = Duration::from_secs(self.poll.timeout_secs);
        let interval = Duration::from_secs(self.poll.interval_secs);

        loop {
            if start.elapsed() > timeout {
                error!(run_id, "polling timeout exceeded, attempting to cancel run");
                let _ = self.cancel_run(thread_id, run_id, api_key).await;
                return Err(AiError::Transient(format!(
                    "polling timeout exceeded for run {run_id} after {}s",
                    self.poll.timeout_secs
                )));
            }

            let url = format!("{}/v1/threads/{}/runs/{}", self.base_url, thread_id, run_id);
            let resp = self
                .http
                .get(&url)
                .bearer_auth(api_key)
                .header("OpenAI-Beta", OPENAI_BETA_HEADER)
                .send()
                .await
                .map_err(classify_transport)?;
            let run: Run = classify_response(resp).await?;

            match run.status.as_str() {
                "completed" => return Ok(run),
                "failed" | "cancelled" | "expired" => {
                    return Err(AiError::NonTransient(format!(
                        "run {run_id} ended with terminal status {}: {:?}",
                        run.status, run.last_error
                    )));
                }
                "requires_action" => {
                    return Err(AiError::NonTransient(format!(
                        "run {run_id} requires action, tool use is unsupported"
                    )));
                }
                _ => {
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str, api_key: &str) -> Result<()> {
        let url = format!("{}/v1/threads/{}/runs/{}/cancel", self.base_url, thread_id, run_id);
        match self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .header("OpenAI-Beta", OPENAI_BETA_HEADER)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(run_id, "failed to cancel timed-out run: {e}");
                Ok(())
            }
        }
    }

    async fn extract_reply(&self, thread_id: &str, run_id: &str, api_key: &str) -> Result<String> {
        let url = format!("{}/v1/threads/{}/messages?order=desc", self.base_url, thread_id);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(api_key)
            .header("OpenAI-Beta", OPENAI_BETA_HEADER)
            .send()
            .await
            .map_err(classify_transport)?;
        let list: MessageList = classify_response(resp).await?;

        for msg in &list.data {
            if msg.role == "assistant" && msg.run_id.as_deref() == Some(run_id) {
                if let Some(text) = msg.content.iter().find(|c| c.kind == "text").and_then(|c| c.text.as_ref()) {
                    debug!(message_id = %msg.id, "found assistant message for run");
                    return Ok(text.value.clone());
                }
                warn!(message_id = %msg.id, "assistant message for run has no text content");
                break;
            }
        }

        Err(AiError::NonTransient(format!(
            "no assistant message with text content found for run {run_id} in thread {thread_id}"
        )))
    }
}

fn classify_transport(e: reqwest::Error) -> AiError {
    AiError::Transient(e.to_string())
}

async fn classify_response<T: for<'de> Deserialize<'de>>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(AiError::Transient("rate limited by OpenAI".into()));
    }
    if status.is_server_error() {
        let text = resp.text().await.unwrap_or_default();
        return Err(AiError::Transient(format!("OpenAI server error {status}: {text}")));
    }
    if status == reqwest::StatusCode::UNAUTHORIZED
        || status == reqwest::StatusCode::FORBIDDEN
        || status == reqwest::StatusCode::NOT_FOUND
        || status == reqwest::StatusCode::BAD_REQUEST
        || status == reqwest::StatusCode::UNPROCESSABLE_ENTITY
    {
        let text = resp.text().await.unwrap_or_default();
        return Err(AiError::NonTransient(format!("OpenAI API error {status}: {text}")));
    }
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(AiError::NonTransient(format!("unexpected OpenAI response {status}: {text}")));
    }

    resp.json::<T>().await.map_err(|e| AiError::NonTransient(format!("failed to parse OpenAI response: {e}")))
}
