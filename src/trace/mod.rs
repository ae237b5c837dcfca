//! Hierarchical span recording.
//!
//! - [`TraceRecorder`] owns every span of a process and hands finished trees
//!   to a [`TraceSink`].
//! - [`SpanScope`] is the per-execution-context view of the recorder: it knows
//!   which span is current for the code holding it. Scopes are passed down the
//!   call chain; there is no process-wide "current span".
//! - [`SpanScope::with_span`] opens a child span, runs a body with a scope
//!   pointing at it and closes the span on every exit path.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

mod recorder;
pub mod sink;

pub use recorder::{SpanScope, TraceRecorder};
pub use sink::{InMemorySink, LogSink, TraceSink};

pub type SpanId = String;
pub type TraceId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpanLevel {
    Debug,
    #[default]
    Default,
    Warning,
    Error,
}

/// A timed, named unit of recorded work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub id: SpanId,
    pub trace_id: TraceId,
    pub name: String,
    pub parent_id: Option<SpanId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub level: SpanLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Span {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.ended_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }

    /// Whether `child`'s closed interval lies inside this span's closed interval.
    pub fn contains(&self, child: &Span) -> bool {
        match (self.ended_at, child.ended_at) {
            (Some(end), Some(child_end)) => {
                child.started_at >= self.started_at && child_end <= end
            }
            _ => false,
        }
    }
}

/// Opaque reference to a recorded span.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpanHandle {
    id: SpanId,
    trace_id: TraceId,
    root: bool,
}

impl SpanHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn is_root(&self) -> bool {
        self.root
    }
}

/// Changes applied to an open span. Metadata is merged key by key, tags are
/// unioned, everything else replaces.
#[derive(Debug, Clone, Default)]
pub struct SpanUpdate {
    name: Option<String>,
    metadata: Map<String, Value>,
    input: Option<Value>,
    output: Option<Value>,
    tags: Vec<String>,
    level: Option<SpanLevel>,
    status_message: Option<String>,
}

impl SpanUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn input(mut self, input: impl Into<Value>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn output(mut self, output: impl Into<Value>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn level(mut self, level: SpanLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn status_message(mut self, message: impl Into<String>) -> Self {
        self.status_message = Some(message.into());
        self
    }

    fn apply(self, span: &mut Span) {
        if let Some(name) = self.name {
            span.name = name;
        }
        span.metadata.extend(self.metadata);
        if let Some(input) = self.input {
            span.input = Some(input);
        }
        if let Some(output) = self.output {
            span.output = Some(output);
        }
        span.tags.extend(self.tags);
        if let Some(level) = self.level {
            span.level = level;
        }
        if let Some(message) = self.status_message {
            span.status_message = Some(message);
        }
    }
}
