use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    future::Future,
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};
use serde_json::Map;
use uuid::Uuid;

use super::{sink::TraceSink, Span, SpanHandle, SpanId, SpanLevel, SpanUpdate, TraceId};
use crate::error::TracingError;

/// Spans of one trace that has not finished yet.
#[derive(Default)]
struct OpenTrace {
    spans: Vec<Span>,
    index: HashMap<SpanId, usize>,
}

impl OpenTrace {
    fn get(&self, id: &str) -> Option<&Span> {
        self.index.get(id).map(|&i| &self.spans[i])
    }

    fn is_descendant(&self, span: &Span, ancestor: &str) -> bool {
        let mut parent = span.parent_id.as_deref();
        while let Some(id) = parent {
            if id == ancestor {
                return true;
            }
            parent = self.get(id).and_then(|p| p.parent_id.as_deref());
        }
        false
    }

    /// Closes `id`, no earlier than its start or any child's end.
    fn close(&mut self, id: &str, now: DateTime<Utc>) {
        let latest_child = self
            .spans
            .iter()
            .filter(|s| s.parent_id.as_deref() == Some(id))
            .filter_map(|s| s.ended_at)
            .max();

        if let Some(&i) = self.index.get(id) {
            let span = &mut self.spans[i];
            let mut end = now.max(span.started_at);
            if let Some(child_end) = latest_child {
                end = end.max(child_end);
            }
            span.ended_at = Some(end);
        }
    }
}

/// Only traces with an open root are held. A finished tree moves to
/// `pending` and leaves the recorder on the next flush.
#[derive(Default)]
struct RecorderState {
    open: HashMap<TraceId, OpenTrace>,
    pending: Vec<Vec<Span>>,
}

impl RecorderState {
    /// Handles are only minted by `begin_span`, so a handle whose trace is
    /// gone points into a finished tree.
    fn trace_of(&self, handle: &SpanHandle) -> Result<&OpenTrace, TracingError> {
        self.open
            .get(&handle.trace_id)
            .ok_or_else(|| TracingError::SpanClosed(handle.id.clone()))
    }

    fn get(&self, handle: &SpanHandle) -> Result<&Span, TracingError> {
        self.trace_of(handle)?
            .get(&handle.id)
            .ok_or_else(|| TracingError::UnknownSpan(handle.id.clone()))
    }

    fn get_open_mut(&mut self, handle: &SpanHandle) -> Result<&mut Span, TracingError> {
        let trace = self
            .open
            .get_mut(&handle.trace_id)
            .ok_or_else(|| TracingError::SpanClosed(handle.id.clone()))?;
        let i = *trace
            .index
            .get(&handle.id)
            .ok_or_else(|| TracingError::UnknownSpan(handle.id.clone()))?;
        let span = &mut trace.spans[i];
        if !span.is_open() {
            return Err(TracingError::SpanClosed(handle.id.clone()));
        }
        Ok(span)
    }
}

/// Records span trees and exports each finished tree to a sink.
#[derive(Clone)]
pub struct TraceRecorder {
    state: Arc<Mutex<RecorderState>>,
    sink: Arc<dyn TraceSink>,
}

impl fmt::Debug for TraceRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("TraceRecorder")
            .field("sink", &self.sink.name())
            .field("open_traces", &state.open.len())
            .field("pending", &state.pending.len())
            .finish()
    }
}

impl TraceRecorder {
    pub fn new(sink: Arc<dyn TraceSink>) -> Self {
        Self {
            state: Arc::new(Mutex::new(RecorderState::default())),
            sink,
        }
    }

    /// A scope with no current span; spans opened from it are roots.
    pub fn root_scope(&self) -> SpanScope {
        SpanScope {
            recorder: self.clone(),
            current: None,
        }
    }

    /// Opens a span under `parent`, or a new trace when `parent` is `None`.
    pub fn begin_span(
        &self,
        name: impl Into<String>,
        parent: Option<&SpanHandle>,
    ) -> Result<SpanHandle, TracingError> {
        let name = name.into();
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();

        let (trace_id, parent_id, started_at) = match parent {
            Some(handle) => {
                let parent = state.get(handle)?;
                if !parent.is_open() {
                    return Err(TracingError::SpanClosed(handle.id.clone()));
                }
                (
                    parent.trace_id.clone(),
                    Some(parent.id.clone()),
                    now.max(parent.started_at),
                )
            }
            None => (Uuid::new_v4().to_string(), None, now),
        };

        let span = Span {
            id: Uuid::new_v4().to_string(),
            trace_id,
            name,
            parent_id,
            input: None,
            output: None,
            metadata: Map::new(),
            tags: BTreeSet::new(),
            level: SpanLevel::Default,
            status_message: None,
            started_at,
            ended_at: None,
        };

        tracing::debug!(
            span_id = %span.id,
            trace_id = %span.trace_id,
            parent_id = span.parent_id.as_deref().unwrap_or("-"),
            name = %span.name,
            "span opened"
        );

        let handle = SpanHandle {
            id: span.id.clone(),
            trace_id: span.trace_id.clone(),
            root: span.parent_id.is_none(),
        };
        let trace = state.open.entry(span.trace_id.clone()).or_default();
        trace.index.insert(span.id.clone(), trace.spans.len());
        trace.spans.push(span);

        Ok(handle)
    }

    pub fn update_span(&self, handle: &SpanHandle, update: SpanUpdate) -> Result<(), TracingError> {
        let mut state = self.state.lock().unwrap();
        let span = state.get_open_mut(handle)?;
        update.apply(span);
        Ok(())
    }

    /// Closes a span. Descendants still open are closed first so the parent
    /// never ends before a child. Closing a root moves its tree out of the
    /// recorder and queues it for export.
    pub fn end_span(&self, handle: &SpanHandle) -> Result<(), TracingError> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        state.get_open_mut(handle)?;

        let now = Utc::now();
        let trace = state
            .open
            .get_mut(&handle.trace_id)
            .ok_or_else(|| TracingError::SpanClosed(handle.id.clone()))?;
        let open_descendants: Vec<SpanId> = trace
            .spans
            .iter()
            .filter(|s| s.is_open() && trace.is_descendant(s, &handle.id))
            .map(|s| s.id.clone())
            .collect();

        // Creation order puts descendants after their ancestors.
        for id in open_descendants.iter().rev() {
            tracing::warn!(span_id = %id, parent_id = %handle.id, "closing span left open by its body");
            trace.close(id, now);
        }
        trace.close(&handle.id, now);

        if let Some(span) = trace.get(&handle.id) {
            tracing::debug!(
                span_id = %span.id,
                name = %span.name,
                duration_ms = span.duration_ms().unwrap_or_default(),
                "span closed"
            );
        }

        if handle.is_root() {
            if let Some(finished) = state.open.remove(&handle.trace_id) {
                state.pending.push(finished.spans);
            }
        }

        Ok(())
    }

    /// A span of a trace that is still open.
    pub fn span(&self, handle: &SpanHandle) -> Option<Span> {
        let state = self.state.lock().unwrap();
        state.get(handle).ok().cloned()
    }

    /// Spans of every trace whose root is still open. Finished trees are
    /// only visible to the sink.
    pub fn spans(&self) -> Vec<Span> {
        let state = self.state.lock().unwrap();
        state
            .open
            .values()
            .flat_map(|trace| trace.spans.iter().cloned())
            .collect()
    }

    pub fn trace(&self, trace_id: &str) -> Vec<Span> {
        let state = self.state.lock().unwrap();
        state
            .open
            .get(trace_id)
            .map(|trace| trace.spans.clone())
            .unwrap_or_default()
    }

    /// Number of finished trees waiting for `flush`.
    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    /// Hands every finished tree to the sink. Export failures are logged and
    /// dropped; they never reach the traced computation.
    pub async fn flush(&self) {
        let pending = std::mem::take(&mut self.state.lock().unwrap().pending);

        for tree in pending {
            let trace_id = tree.first().map(|s| s.trace_id.clone()).unwrap_or_default();
            match self.sink.export(&tree).await {
                Ok(()) => tracing::debug!(
                    sink = self.sink.name(),
                    trace_id = %trace_id,
                    spans = tree.len(),
                    "trace exported"
                ),
                Err(error) => tracing::warn!(
                    sink = self.sink.name(),
                    trace_id = %trace_id,
                    error = %error,
                    "trace export failed; dropping"
                ),
            }
        }
    }
}

/// Ends a span when dropped unless disarmed, so cancellation and panics
/// inside a body still close it.
struct OpenSpan {
    recorder: TraceRecorder,
    handle: SpanHandle,
    armed: bool,
}

impl OpenSpan {
    fn finish(mut self) -> Result<(), TracingError> {
        self.armed = false;
        self.recorder.end_span(&self.handle)
    }
}

impl Drop for OpenSpan {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let reason = if std::thread::panicking() {
            "span body panicked"
        } else {
            "span body was cancelled"
        };
        let update = SpanUpdate::new()
            .level(SpanLevel::Error)
            .status_message(reason);
        if self.recorder.update_span(&self.handle, update).is_ok() {
            let _ = self.recorder.end_span(&self.handle);
        }
    }
}

/// The recorder as seen from one execution context.
#[derive(Clone, Debug)]
pub struct SpanScope {
    recorder: TraceRecorder,
    current: Option<SpanHandle>,
}

impl SpanScope {
    pub fn recorder(&self) -> &TraceRecorder {
        &self.recorder
    }

    pub fn current(&self) -> Option<&SpanHandle> {
        self.current.as_ref()
    }

    /// Updates the innermost span open in this scope. A scope without a
    /// current span reports `UnknownSpan`.
    pub fn update_current_span(&self, update: SpanUpdate) -> Result<(), TracingError> {
        let handle = self
            .current
            .as_ref()
            .ok_or_else(|| TracingError::UnknownSpan("<no current span>".to_string()))?;
        self.recorder.update_span(handle, update)
    }

    /// Runs `body` inside a new child span of this scope's current span.
    ///
    /// The span is ended whether `body` succeeds or fails; a failure marks it
    /// `ERROR` with the error text and is returned unchanged. A finished root
    /// is queued, not exported; call [`TraceRecorder::flush`] to export.
    pub async fn with_span<T, E, F, Fut>(&self, name: &str, body: F) -> Result<T, E>
    where
        F: FnOnce(SpanScope) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<TracingError> + fmt::Display,
    {
        let handle = self.recorder.begin_span(name, self.current.as_ref())?;
        let guard = OpenSpan {
            recorder: self.recorder.clone(),
            handle: handle.clone(),
            armed: true,
        };
        let child = SpanScope {
            recorder: self.recorder.clone(),
            current: Some(handle.clone()),
        };

        let result = body(child).await;

        if let Err(error) = &result {
            let update = SpanUpdate::new()
                .level(SpanLevel::Error)
                .status_message(error.to_string());
            if let Err(tracing_error) = self.recorder.update_span(&handle, update) {
                tracing::warn!(span_id = %handle.id(), error = %tracing_error, "could not mark span as failed");
            }
        }

        let ended = guard.finish();

        match (result, ended) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(error)) => Err(error.into()),
            (Err(error), _) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::trace::sink::InMemorySink;

    #[derive(Debug, thiserror::Error)]
    enum BodyError {
        #[error("body failed: {0}")]
        Failed(&'static str),
        #[error(transparent)]
        Tracing(#[from] TracingError),
    }

    fn recorder() -> (TraceRecorder, Arc<InMemorySink>) {
        let sink = Arc::new(InMemorySink::new());
        (TraceRecorder::new(sink.clone()), sink)
    }

    fn assert_nested(spans: &[Span]) {
        for child in spans.iter().filter(|s| !s.is_root()) {
            let parent = spans
                .iter()
                .find(|s| Some(&s.id) == child.parent_id.as_ref())
                .expect("parent recorded");
            assert!(parent.contains(child), "{} escapes {}", child.name, parent.name);
        }
    }

    #[tokio::test]
    async fn begin_and_end_build_a_tree() {
        let (recorder, sink) = recorder();
        let root = recorder.begin_span("root", None).unwrap();
        let child = recorder.begin_span("child", Some(&root)).unwrap();

        assert_eq!(child.trace_id(), root.trace_id());
        assert!(root.is_root());
        assert!(!child.is_root());

        recorder.end_span(&child).unwrap();
        assert!(!recorder.span(&child).unwrap().is_open());
        assert_eq!(recorder.trace(root.trace_id()).len(), 2);

        recorder.end_span(&root).unwrap();
        assert_eq!(recorder.pending(), 1);
        assert!(recorder.trace(root.trace_id()).is_empty());

        recorder.flush().await;
        let spans = &sink.traces()[0];
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[1].parent_id.as_deref(), Some(root.id()));
        assert_nested(spans);
    }

    #[test]
    fn closed_spans_reject_updates_children_and_second_end() {
        let (recorder, _) = recorder();
        let root = recorder.begin_span("root", None).unwrap();
        recorder.end_span(&root).unwrap();

        let update = recorder.update_span(&root, SpanUpdate::new().metadata("k", 1));
        assert!(matches!(update, Err(TracingError::SpanClosed(_))));
        assert!(matches!(recorder.end_span(&root), Err(TracingError::SpanClosed(_))));
        assert!(matches!(
            recorder.begin_span("late", Some(&root)),
            Err(TracingError::SpanClosed(_))
        ));
    }

    #[tokio::test]
    async fn ending_a_parent_closes_open_descendants_first() {
        let (recorder, sink) = recorder();
        let root = recorder.begin_span("root", None).unwrap();
        let child = recorder.begin_span("child", Some(&root)).unwrap();
        recorder.begin_span("grandchild", Some(&child)).unwrap();

        recorder.end_span(&root).unwrap();
        recorder.flush().await;

        let tree = &sink.traces()[0];
        assert_eq!(tree.len(), 3);
        assert!(tree.iter().all(|s| !s.is_open()));
        assert_nested(tree);
        assert!(matches!(recorder.end_span(&child), Err(TracingError::SpanClosed(_))));
    }

    #[tokio::test]
    async fn finished_traces_leave_the_recorder() {
        let (recorder, sink) = recorder();
        let scope = recorder.root_scope();

        for i in 0..200 {
            scope
                .with_span("request", |scope| async move {
                    scope
                        .with_span("step", |scope| async move {
                            scope.update_current_span(SpanUpdate::new().metadata("i", i))?;
                            Ok::<_, BodyError>(())
                        })
                        .await
                })
                .await
                .unwrap();
        }

        assert!(recorder.spans().is_empty());
        assert_eq!(recorder.pending(), 200);
        recorder.flush().await;
        assert_eq!(recorder.pending(), 0);
        assert_eq!(sink.traces().len(), 200);
        sink.clear();

        let open = recorder.begin_span("still_running", None).unwrap();
        assert_eq!(recorder.spans().len(), 1);
        recorder.end_span(&open).unwrap();
        assert!(recorder.spans().is_empty());
    }

    #[tokio::test]
    async fn with_span_nests_and_exports_the_finished_tree() {
        let (recorder, sink) = recorder();
        let scope = recorder.root_scope();

        let value = scope
            .with_span("pipeline", |scope| async move {
                let first = scope
                    .with_span("analyze", |scope| async move {
                        scope.update_current_span(SpanUpdate::new().metadata("step", 1))?;
                        Ok::<_, BodyError>(1)
                    })
                    .await?;
                let second = scope
                    .with_span("respond", |_| async move { Ok::<_, BodyError>(2) })
                    .await?;
                scope.update_current_span(
                    SpanUpdate::new()
                        .metadata("total_steps", 2)
                        .tags(["pipeline"])
                        .output(json!({ "sum": first + second })),
                )?;
                Ok::<_, BodyError>(first + second)
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert!(sink.traces().is_empty());
        recorder.flush().await;
        let traces = sink.traces();
        assert_eq!(traces.len(), 1);
        let tree = &traces[0];
        assert_eq!(tree.len(), 3);
        assert!(tree.iter().all(|s| !s.is_open()));
        assert_nested(tree);

        let root = tree.iter().find(|s| s.is_root()).unwrap();
        assert_eq!(root.name, "pipeline");
        assert_eq!(root.metadata.get("total_steps"), Some(&json!(2)));
        assert!(root.tags.contains("pipeline"));
        let analyze = tree.iter().find(|s| s.name == "analyze").unwrap();
        assert_eq!(analyze.parent_id.as_ref(), Some(&root.id));
        assert_eq!(analyze.metadata.get("step"), Some(&json!(1)));
        assert!(root.metadata.get("step").is_none());
    }

    #[tokio::test]
    async fn failing_body_still_closes_its_span_and_propagates() {
        let (recorder, sink) = recorder();
        let scope = recorder.root_scope();

        let result: Result<(), BodyError> = scope
            .with_span("outer", |scope| async move {
                scope
                    .with_span("inner", |_| async move { Err(BodyError::Failed("boom")) })
                    .await
            })
            .await;

        assert!(matches!(result, Err(BodyError::Failed("boom"))));
        recorder.flush().await;
        let tree = &sink.traces()[0];
        assert!(tree.iter().all(|s| !s.is_open()));
        assert!(tree.iter().all(|s| s.level == SpanLevel::Error));
        assert_eq!(
            tree[1].status_message.as_deref(),
            Some("body failed: boom")
        );
    }

    #[tokio::test]
    async fn dropped_body_closes_its_span_as_failed() {
        let (recorder, sink) = recorder();
        let scope = recorder.root_scope();

        {
            let future = scope.with_span("abandoned", |_| async move {
                std::future::pending::<Result<(), BodyError>>().await
            });
            let _ = tokio::time::timeout(std::time::Duration::from_millis(10), future).await;
        }

        assert!(recorder.spans().is_empty());
        recorder.flush().await;
        let spans = sink.spans();
        assert_eq!(spans.len(), 1);
        assert!(!spans[0].is_open());
        assert_eq!(spans[0].level, SpanLevel::Error);
        assert_eq!(spans[0].status_message.as_deref(), Some("span body was cancelled"));
    }

    #[tokio::test]
    async fn panicking_body_closes_its_span_as_failed() {
        use futures_util::FutureExt;

        let (recorder, sink) = recorder();
        let scope = recorder.root_scope();

        fn explode() -> Result<(), BodyError> {
            panic!("boom")
        }

        let outcome = std::panic::AssertUnwindSafe(
            scope.with_span("exploding", |_| async move { explode() }),
        )
        .catch_unwind()
        .await;

        assert!(outcome.is_err());
        recorder.flush().await;
        let spans = sink.spans();
        assert_eq!(spans.len(), 1);
        assert!(!spans[0].is_open());
        assert_eq!(spans[0].level, SpanLevel::Error);
        assert!(spans[0].status_message.is_some());
    }

    #[tokio::test]
    async fn scope_outliving_its_span_reports_span_closed() {
        let (recorder, _) = recorder();
        let scope = recorder.root_scope();

        let (escaped_root, escaped_child) = scope
            .with_span("root", |root_scope| async move {
                let escaped_child = root_scope
                    .with_span("child", |child_scope| async move {
                        Ok::<_, BodyError>(child_scope)
                    })
                    .await?;

                let closed = escaped_child.update_current_span(SpanUpdate::new().metadata("late", true));
                assert!(matches!(closed, Err(TracingError::SpanClosed(_))));

                Ok::<_, BodyError>((root_scope, escaped_child))
            })
            .await
            .unwrap();

        for escaped in [&escaped_root, &escaped_child] {
            let update = escaped.update_current_span(SpanUpdate::new().output("late"));
            assert!(matches!(update, Err(TracingError::SpanClosed(_))));
        }
    }

    #[tokio::test]
    async fn scopes_keep_their_own_current_span() {
        let (recorder, _) = recorder();
        let scope = recorder.root_scope();
        assert!(scope.update_current_span(SpanUpdate::new()).is_err());

        scope
            .with_span("root", |root_scope| async move {
                let before = root_scope.current().cloned();
                root_scope
                    .with_span("child", |child_scope| async move {
                        assert_eq!(child_scope.current().map(SpanHandle::is_root), Some(false));
                        Ok::<_, BodyError>(())
                    })
                    .await?;
                assert_eq!(root_scope.current(), before.as_ref());
                Ok::<_, BodyError>(())
            })
            .await
            .unwrap();
    }
}
