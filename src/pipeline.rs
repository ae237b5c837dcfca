//! Customer-message pipelines built from traced structured completions.

use std::fmt;

use handlebars::Handlebars;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    error::{CompletionError, TracingError},
    structured::{FieldKind, SchemaDescriptor, StructuredClient, StructuredOutput},
    trace::{SpanScope, SpanUpdate},
};

pub const DEFAULT_INQUIRY_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_SUPPORT_MODEL: &str = "gpt-4.1";

const INQUIRY_SYSTEM_PROMPT: &str =
    "You are a customer service AI that analyzes customer inquiries.";

const ANALYSIS_SYSTEM_PROMPT: &str = "Analyze customer queries and classify them.

Categories:
- billing: payment, subscription, refund issues
- technical: bugs, errors, setup problems
- general: questions, feature requests

Urgency levels:
- low: general inquiries
- medium: affecting service usage
- high: business-critical issues";

const RESPONSE_SYSTEM_TEMPLATE: &str = "You are a helpful customer service representative.

Customer context:
- Issue category: {{category}}
- Urgency level: {{urgency}}
- Issue summary: {{summary}}

Generate a professional, helpful response.";

const STORY_SYSTEM_PROMPT: &str = "You are a creative storyteller.";

static PROMPTS: Lazy<Handlebars<'static>> = Lazy::new(|| {
    let mut hb = Handlebars::new();
    hb.register_escape_fn(handlebars::no_escape);
    hb
});

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Completion(#[from] CompletionError),
    #[error(transparent)]
    Tracing(#[from] TracingError),
    #[error("prompt render error: {0}")]
    Render(#[from] handlebars::RenderError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InquiryCategory {
    Complaint,
    FeatureRequest,
    Billing,
    Other,
}

impl InquiryCategory {
    pub const ALL: [InquiryCategory; 4] = [
        InquiryCategory::Complaint,
        InquiryCategory::FeatureRequest,
        InquiryCategory::Billing,
        InquiryCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InquiryCategory::Complaint => "complaint",
            InquiryCategory::FeatureRequest => "feature_request",
            InquiryCategory::Billing => "billing",
            InquiryCategory::Other => "other",
        }
    }
}

impl fmt::Display for InquiryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InquiryResult {
    pub category: InquiryCategory,
    pub response: String,
}

impl StructuredOutput for InquiryResult {
    fn schema() -> SchemaDescriptor {
        SchemaDescriptor::new("CustomerInquiry")
            .field(
                "category",
                FieldKind::enumeration(InquiryCategory::ALL.iter().map(InquiryCategory::as_str)),
            )
            .field("response", FieldKind::Text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub category: String,
    pub urgency: Urgency,
    pub summary: String,
}

impl StructuredOutput for QueryAnalysis {
    fn schema() -> SchemaDescriptor {
        SchemaDescriptor::new("CustomerQuery")
            .described_field(
                "category",
                FieldKind::Text,
                "Query category: billing, technical, or general",
            )
            .described_field(
                "urgency",
                FieldKind::enumeration(["low", "medium", "high"]),
                "Urgency: low, medium, high",
            )
            .described_field("summary", FieldKind::Text, "Brief summary of the issue")
    }
}

/// Classifies a customer message and drafts a reply, at temperature 0.
pub async fn process_customer_message(
    client: &StructuredClient,
    scope: &SpanScope,
    message: &str,
) -> Result<InquiryResult, PipelineError> {
    scope
        .with_span("process_customer_message", |scope| async move {
            let result: InquiryResult = client
                .complete_as(INQUIRY_SYSTEM_PROMPT, message, 0.0)
                .await?;

            scope.update_current_span(
                SpanUpdate::new()
                    .input(json!({ "message": message }))
                    .output(serde_json::to_value(&result)?)
                    .metadata("category", result.category.as_str())
                    .metadata("response_length", result.response.chars().count())
                    .metadata("customer_message_length", message.chars().count()),
            )?;

            Ok(result)
        })
        .await
}

pub async fn analyze_customer_query(
    client: &StructuredClient,
    scope: &SpanScope,
    query: &str,
) -> Result<QueryAnalysis, PipelineError> {
    scope
        .with_span("analyze_customer_query", |scope| async move {
            let analysis: QueryAnalysis = client
                .complete_as(
                    ANALYSIS_SYSTEM_PROMPT,
                    &format!("Customer query: {query}"),
                    0.1,
                )
                .await?;

            scope.update_current_span(
                SpanUpdate::new()
                    .name("customer_query_analysis")
                    .metadata("category", analysis.category.clone())
                    .metadata("urgency", analysis.urgency.as_str())
                    .metadata("query_length", query.chars().count())
                    .input(json!({ "query": query }))
                    .output(serde_json::to_value(&analysis)?),
            )?;

            Ok(analysis)
        })
        .await
}

pub async fn generate_response(
    client: &StructuredClient,
    scope: &SpanScope,
    query: &str,
    analysis: &QueryAnalysis,
) -> Result<String, PipelineError> {
    scope
        .with_span("generate_response", |scope| async move {
            let system_prompt = PROMPTS.render_template(
                RESPONSE_SYSTEM_TEMPLATE,
                &json!({
                    "category": analysis.category,
                    "urgency": analysis.urgency.as_str(),
                    "summary": analysis.summary,
                }),
            )?;

            let response = client
                .complete_text(
                    &system_prompt,
                    &format!("Original query: {query}\n\nGenerate a response:"),
                    None,
                )
                .await?;

            scope.update_current_span(
                SpanUpdate::new()
                    .name("response_generation")
                    .metadata("category", analysis.category.clone())
                    .metadata("urgency", analysis.urgency.as_str())
                    .metadata("response_length", response.chars().count())
                    .input(json!({ "query": query, "analysis": serde_json::to_value(analysis)? }))
                    .output(json!({ "response": response })),
            )?;

            Ok(response)
        })
        .await
}

/// Analysis followed by response generation, both nested under one span.
pub async fn customer_support_pipeline(
    client: &StructuredClient,
    scope: &SpanScope,
    query: &str,
) -> Result<(QueryAnalysis, String), PipelineError> {
    scope
        .with_span("customer_support_pipeline", |scope| async move {
            let analysis = analyze_customer_query(client, &scope, query).await?;
            let response = generate_response(client, &scope, query, &analysis).await?;

            scope.update_current_span(
                SpanUpdate::new()
                    .metadata("total_steps", 2)
                    .metadata("final_category", analysis.category.clone())
                    .metadata("final_urgency", analysis.urgency.as_str())
                    .input(json!({ "customer_query": query }))
                    .output(json!({
                        "analysis": serde_json::to_value(&analysis)?,
                        "response": response,
                    }))
                    .tags(["customer_support", "pipeline", "business_example"]),
            )?;

            Ok((analysis, response))
        })
        .await
}

pub async fn simple_story_generator(
    client: &StructuredClient,
    scope: &SpanScope,
    topic: &str,
) -> Result<String, PipelineError> {
    scope
        .with_span("simple_story_generator", |scope| async move {
            let story = client
                .complete_text(
                    STORY_SYSTEM_PROMPT,
                    &format!("Write a short story about: {topic}"),
                    None,
                )
                .await?;

            scope.update_current_span(
                SpanUpdate::new()
                    .input(json!({ "topic": topic }))
                    .output(story.clone()),
            )?;

            Ok(story)
        })
        .await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::{
        providers::scripted::{ScriptedProvider, ScriptedReply},
        trace::{InMemorySink, SpanLevel, TraceRecorder},
    };

    fn setup(replies: Vec<ScriptedReply>) -> (Arc<ScriptedProvider>, StructuredClient, TraceRecorder, Arc<InMemorySink>) {
        let provider = Arc::new(ScriptedProvider::from_replies(replies));
        let client = StructuredClient::new(provider.clone(), DEFAULT_SUPPORT_MODEL);
        let sink = Arc::new(InMemorySink::new());
        let recorder = TraceRecorder::new(sink.clone());
        (provider, client, recorder, sink)
    }

    #[test]
    fn inquiry_schema_enumerates_every_category() {
        let schema = InquiryResult::schema().json_schema();
        assert_eq!(
            schema["properties"]["category"]["enum"],
            json!(["complaint", "feature_request", "billing", "other"])
        );
    }

    #[tokio::test]
    async fn process_customer_message_records_metadata() {
        let (provider, client, recorder, sink) = setup(vec![ScriptedReply::json(&json!({
            "category": "billing",
            "response": "We're sorry about the double charge."
        }))]);

        let message = "I was charged twice, please refund me.";
        let result = process_customer_message(&client, &recorder.root_scope(), message)
            .await
            .unwrap();
        recorder.flush().await;

        assert_eq!(result.category, InquiryCategory::Billing);
        assert_eq!(provider.requests()[0].temperature, Some(0.0));

        let spans = sink.spans();
        assert_eq!(spans.len(), 1);
        let span = &spans[0];
        assert_eq!(span.name, "process_customer_message");
        assert_eq!(span.metadata["category"], json!("billing"));
        assert_eq!(
            span.metadata["response_length"],
            json!("We're sorry about the double charge.".len())
        );
        assert_eq!(span.metadata["customer_message_length"], json!(message.len()));
    }

    #[tokio::test]
    async fn support_pipeline_nests_both_steps_under_one_root() {
        let (provider, client, recorder, sink) = setup(vec![
            ScriptedReply::json(&json!({
                "category": "billing",
                "urgency": "high",
                "summary": "Double charge on Premium subscription"
            })),
            ScriptedReply::Content("We have issued a refund for the duplicate charge.".to_string()),
        ]);

        let (analysis, response) = customer_support_pipeline(
            &client,
            &recorder.root_scope(),
            "I was charged twice this month and need a refund.",
        )
        .await
        .unwrap();
        recorder.flush().await;

        assert_eq!(analysis.urgency, Urgency::High);
        assert!(response.contains("refund"));

        let requests = provider.requests();
        assert_eq!(requests[0].temperature, Some(0.1));
        let system = requests[1].messages[0].text().unwrap();
        assert!(system.contains("- Urgency level: high"));
        assert!(system.contains("- Issue summary: Double charge on Premium subscription"));

        let traces = sink.traces();
        assert_eq!(traces.len(), 1);
        let tree = &traces[0];
        let root = tree.iter().find(|s| s.is_root()).unwrap();
        assert_eq!(root.name, "customer_support_pipeline");
        assert_eq!(root.metadata["total_steps"], json!(2));
        assert_eq!(root.metadata["final_urgency"], json!("high"));
        assert!(root.tags.contains("business_example"));

        let names: Vec<&str> = tree
            .iter()
            .filter(|s| s.parent_id.as_ref() == Some(&root.id))
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, ["customer_query_analysis", "response_generation"]);
        assert!(tree.iter().filter(|s| !s.is_root()).all(|s| root.contains(s)));
    }

    #[tokio::test]
    async fn failed_analysis_stops_the_pipeline_and_marks_spans() {
        let (provider, client, recorder, sink) = setup(vec![ScriptedReply::json(&json!({
            "category": "billing",
            "urgency": "catastrophic",
            "summary": "?"
        }))]);

        let error = customer_support_pipeline(&client, &recorder.root_scope(), "help")
            .await
            .unwrap_err();
        recorder.flush().await;

        assert!(matches!(
            error,
            PipelineError::Completion(CompletionError::SchemaViolation { .. })
        ));
        assert_eq!(provider.requests().len(), 1);
        let tree = &sink.traces()[0];
        assert_eq!(tree.len(), 2);
        assert!(tree.iter().all(|s| !s.is_open() && s.level == SpanLevel::Error));
    }

    #[tokio::test]
    async fn story_generator_records_input_and_output() {
        let (_, client, recorder, sink) =
            setup(vec![ScriptedReply::Content("A robot burnt the toast.".to_string())]);

        let story = simple_story_generator(&client, &recorder.root_scope(), "a robot learning to cook")
            .await
            .unwrap();
        recorder.flush().await;

        assert_eq!(story, "A robot burnt the toast.");
        let span = &sink.spans()[0];
        assert_eq!(span.input, Some(json!({ "topic": "a robot learning to cook" })));
        assert_eq!(span.output, Some(json!("A robot burnt the toast.")));
    }
}
