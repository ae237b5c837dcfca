//! Langfuse public API: trace ingestion and score configs.

use std::{collections::BTreeSet, env, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    error::{ConfigError, ExportError, RegistrationError},
    score::{ScoreConfig, ScoreConfigId, ScoreConfigRegistry},
    trace::{Span, TraceSink},
};

const DEFAULT_HOST: &str = "https://cloud.langfuse.com";

#[derive(Debug, Clone)]
pub struct LangfuseConfig {
    pub public_key: String,
    pub secret_key: String,
    pub host: String,
    pub request_timeout: Duration,
}

impl LangfuseConfig {
    pub fn new(public_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            secret_key: secret_key.into(),
            host: DEFAULT_HOST.to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let public_key = env::var("LANGFUSE_PUBLIC_KEY")
            .map_err(|_| ConfigError::MissingVar("LANGFUSE_PUBLIC_KEY"))?;
        let secret_key = env::var("LANGFUSE_SECRET_KEY")
            .map_err(|_| ConfigError::MissingVar("LANGFUSE_SECRET_KEY"))?;
        let mut config = Self::new(public_key, secret_key);

        if let Ok(host) = env::var("LANGFUSE_HOST") {
            config.host = host;
        }
        if let Ok(timeout_ms) = env::var("LANGFUSE_TIMEOUT_MS") {
            if let Ok(ms) = timeout_ms.parse::<u64>() {
                config.request_timeout = Duration::from_millis(ms);
            }
        }

        Ok(config)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }
}

#[derive(Debug, Clone)]
pub struct LangfuseClient {
    client: Client,
    config: LangfuseConfig,
}

impl LangfuseClient {
    pub fn from_config(config: LangfuseConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_config(LangfuseConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.host.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.basic_auth(&self.config.public_key, Some(&self.config.secret_key))
    }
}

#[derive(Debug, Deserialize)]
struct IngestionResponse {
    #[serde(default)]
    errors: Vec<IngestionError>,
}

#[derive(Debug, Deserialize)]
struct IngestionError {
    id: String,
    status: u16,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedScoreConfig {
    id: String,
}

/// Converts one finished span tree into an ingestion batch: the root becomes
/// the trace, every other span a `span-create` observation.
pub fn ingestion_batch(spans: &[Span]) -> Value {
    let now = Utc::now().to_rfc3339();
    let mut batch = Vec::with_capacity(spans.len());

    let Some(root) = spans.iter().find(|s| s.is_root()) else {
        return json!({ "batch": batch });
    };

    let tags: BTreeSet<&String> = spans.iter().flat_map(|s| s.tags.iter()).collect();
    batch.push(json!({
        "id": Uuid::new_v4().to_string(),
        "timestamp": now,
        "type": "trace-create",
        "body": {
            "id": root.trace_id,
            "name": root.name,
            "timestamp": root.started_at.to_rfc3339(),
            "input": root.input,
            "output": root.output,
            "metadata": root.metadata,
            "tags": tags,
        }
    }));

    for span in spans.iter().filter(|s| !s.is_root()) {
        let parent = span
            .parent_id
            .as_deref()
            .filter(|parent| *parent != root.id);

        batch.push(json!({
            "id": Uuid::new_v4().to_string(),
            "timestamp": now,
            "type": "span-create",
            "body": {
                "id": span.id,
                "traceId": span.trace_id,
                "parentObservationId": parent,
                "name": span.name,
                "startTime": span.started_at.to_rfc3339(),
                "endTime": span.ended_at.map(|t| t.to_rfc3339()),
                "input": span.input,
                "output": span.output,
                "metadata": span.metadata,
                "level": span.level,
                "statusMessage": span.status_message,
            }
        }));
    }

    json!({ "batch": batch })
}

#[async_trait]
impl TraceSink for LangfuseClient {
    async fn export(&self, spans: &[Span]) -> Result<(), ExportError> {
        let body = ingestion_batch(spans);

        let response = self
            .authorized(self.client.post(self.endpoint("api/public/ingestion")))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ExportError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: IngestionResponse = serde_json::from_str(&text)?;
        if let Some(first) = parsed.errors.first() {
            return Err(ExportError::Rejected {
                status: first.status,
                body: format!(
                    "{} of {} events rejected (first {}: {})",
                    parsed.errors.len(),
                    spans.len(),
                    first.id,
                    first.message.as_deref().unwrap_or("no message")
                ),
            });
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "langfuse"
    }
}

#[async_trait]
impl ScoreConfigRegistry for LangfuseClient {
    async fn register(&self, config: &ScoreConfig) -> Result<ScoreConfigId, RegistrationError> {
        config.validate()?;

        let response = self
            .authorized(self.client.post(self.endpoint("api/public/score-configs")))
            .json(config)
            .send()
            .await?;
        let status = response.status();

        if status == StatusCode::CONFLICT {
            return Err(RegistrationError::DuplicateName(config.name.clone()));
        }
        if !status.is_success() {
            let text = response.text().await?;
            return Err(RegistrationError::TransportFailure(format!(
                "unexpected status {status}: {text}"
            )));
        }

        let created: CreatedScoreConfig = response.json().await?;
        tracing::info!(id = %created.id, name = %config.name, "score config registered with langfuse");
        Ok(ScoreConfigId(created.id))
    }
}
