use std::sync::Mutex;

use async_trait::async_trait;

use super::Span;
use crate::error::ExportError;

/// Destination for finished span trees. Delivery is best-effort: the
/// recorder logs a failed export and moves on.
#[async_trait]
pub trait TraceSink: Send + Sync {
    async fn export(&self, spans: &[Span]) -> Result<(), ExportError>;

    fn name(&self) -> &'static str;
}

/// Keeps exported trees in memory, one entry per trace.
#[derive(Debug, Default)]
pub struct InMemorySink {
    traces: Mutex<Vec<Vec<Span>>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn traces(&self) -> Vec<Vec<Span>> {
        self.traces.lock().unwrap().clone()
    }

    pub fn spans(&self) -> Vec<Span> {
        self.traces.lock().unwrap().iter().flatten().cloned().collect()
    }

    pub fn clear(&self) {
        self.traces.lock().unwrap().clear();
    }
}

#[async_trait]
impl TraceSink for InMemorySink {
    async fn export(&self, spans: &[Span]) -> Result<(), ExportError> {
        self.traces.lock().unwrap().push(spans.to_vec());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Writes every span as a structured log event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl TraceSink for LogSink {
    async fn export(&self, spans: &[Span]) -> Result<(), ExportError> {
        for span in spans {
            tracing::info!(
                trace_id = %span.trace_id,
                span_id = %span.id,
                parent_id = span.parent_id.as_deref().unwrap_or("-"),
                name = %span.name,
                duration_ms = span.duration_ms().unwrap_or_default(),
                level = ?span.level,
                metadata = %serde_json::Value::Object(span.metadata.clone()),
                tags = ?span.tags,
                "span"
            );
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
