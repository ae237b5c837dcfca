pub mod error;
pub mod eval;
pub mod langfuse;
pub mod logging;
pub mod pipeline;
pub mod providers;
pub mod score;
pub mod structured;
pub mod trace;
pub mod types;

pub use error::{
    CompletionError, ConfigError, ExportError, LLMError, RegistrationError, TracingError,
};
pub use eval::{EvalRunner, ExitPolicy, FixtureSet, NamedTest, RunSummary, TestResult};
pub use langfuse::{LangfuseClient, LangfuseConfig};
pub use pipeline::{InquiryCategory, InquiryResult, PipelineError, QueryAnalysis, Urgency};
pub use providers::LLMProvider;
pub use score::{ScoreConfig, ScoreConfigId, ScoreConfigRegistry};
pub use structured::{SchemaDescriptor, StructuredClient, StructuredOutput};
pub use trace::{Span, SpanHandle, SpanLevel, SpanScope, SpanUpdate, TraceRecorder, TraceSink};
pub use types::{ChatMessage, CompletionRequest, CompletionResponse, MessageRole, TokenUsage};
