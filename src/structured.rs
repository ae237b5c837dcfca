//! Schema-constrained completions.
//!
//! A [`SchemaDescriptor`] is an explicit field-name → type contract. It is
//! sent to the provider as a strict `json_schema` response format and checked
//! again after the reply arrives, so a provider that ignores the constraint
//! still cannot hand back a value outside the declared shape.

use std::{sync::Arc, time::Duration};

use jsonschema::{Draft, JSONSchema};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use crate::{
    error::CompletionError,
    types::{ChatMessage, CompletionRequest, CompletionResponse},
    LLMProvider,
};

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Text,
    Integer,
    Number,
    Boolean,
    Enum(Vec<String>),
}

impl FieldKind {
    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Enum(values.into_iter().map(Into::into).collect())
    }

    fn json_schema(&self) -> Value {
        match self {
            FieldKind::Text => json!({ "type": "string" }),
            FieldKind::Integer => json!({ "type": "integer" }),
            FieldKind::Number => json!({ "type": "number" }),
            FieldKind::Boolean => json!({ "type": "boolean" }),
            FieldKind::Enum(values) => json!({ "type": "string", "enum": values }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub description: Option<String>,
}

/// A closed set of required fields. Extra properties are rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDescriptor {
    name: String,
    fields: Vec<FieldSpec>,
}

impl SchemaDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            description: None,
        });
        self
    }

    pub fn described_field(
        mut self,
        name: impl Into<String>,
        kind: FieldKind,
        description: impl Into<String>,
    ) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            description: Some(description.into()),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            let mut schema = field.kind.json_schema();
            if let (Some(description), Some(object)) = (&field.description, schema.as_object_mut()) {
                object.insert("description".to_string(), Value::String(description.clone()));
            }
            properties.insert(field.name.clone(), schema);
        }

        let required: Vec<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    /// The OpenAI `response_format` payload for strict structured output.
    pub fn response_format(&self) -> Value {
        json!({
            "type": "json_schema",
            "json_schema": {
                "name": self.name,
                "strict": true,
                "schema": self.json_schema(),
            }
        })
    }

    pub fn validate(&self, value: &Value) -> Result<(), Vec<String>> {
        let schema = self.json_schema();
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&schema)
            .map_err(|e| vec![format!("failed to compile schema: {e}")])?;

        let result = match compiled.validate(value) {
            Ok(()) => Ok(()),
            Err(errors) => Err(errors.take(5).map(|e| e.to_string()).collect()),
        };
        result
    }
}

/// Binds a Rust type to the descriptor its JSON form must satisfy.
pub trait StructuredOutput: DeserializeOwned {
    fn schema() -> SchemaDescriptor;
}

#[derive(Clone)]
pub struct StructuredClient {
    provider: Arc<dyn LLMProvider>,
    model: String,
    timeout: Option<Duration>,
    max_tokens: Option<u32>,
}

impl std::fmt::Debug for StructuredClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuredClient")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl StructuredClient {
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            timeout: None,
            max_tokens: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_tokens(mut self, value: u32) -> Self {
        self.max_tokens = Some(value);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Sends one schema-constrained request and parses the reply into `T`.
    pub async fn complete<T: DeserializeOwned>(
        &self,
        system_prompt: &str,
        user_message: &str,
        schema: &SchemaDescriptor,
        temperature: f32,
    ) -> Result<T, CompletionError> {
        check_user_message(user_message)?;
        check_temperature(temperature)?;

        let request = self
            .request(system_prompt, user_message)
            .with_temperature(temperature)
            .with_response_format(schema.response_format());

        let response = self.send(request).await?;
        let content = reply_content(&response)?;

        let value: Value = serde_json::from_str(content).map_err(|e| {
            CompletionError::EmptyResponse(format!("reply content is not JSON: {e}"))
        })?;

        schema
            .validate(&value)
            .map_err(|errors| CompletionError::SchemaViolation {
                schema: schema.name().to_string(),
                reason: errors.join("; "),
            })?;

        serde_json::from_value(value).map_err(|e| CompletionError::SchemaViolation {
            schema: schema.name().to_string(),
            reason: e.to_string(),
        })
    }

    pub async fn complete_as<T: StructuredOutput>(
        &self,
        system_prompt: &str,
        user_message: &str,
        temperature: f32,
    ) -> Result<T, CompletionError> {
        self.complete(system_prompt, user_message, &T::schema(), temperature)
            .await
    }

    /// Free-text completion for steps that do not need a schema.
    pub async fn complete_text(
        &self,
        system_prompt: &str,
        user_message: &str,
        temperature: Option<f32>,
    ) -> Result<String, CompletionError> {
        check_user_message(user_message)?;
        let mut request = self.request(system_prompt, user_message);
        if let Some(temperature) = temperature {
            check_temperature(temperature)?;
            request = request.with_temperature(temperature);
        }

        let response = self.send(request).await?;
        reply_content(&response).map(str::to_string)
    }

    fn request(&self, system_prompt: &str, user_message: &str) -> CompletionRequest {
        let mut request = CompletionRequest::new(
            self.model.clone(),
            vec![
                ChatMessage::system(system_prompt),
                ChatMessage::user(user_message),
            ],
        );
        if let Some(max_tokens) = self.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        request
    }

    async fn send(&self, request: CompletionRequest) -> Result<CompletionResponse, CompletionError> {
        tracing::debug!(
            provider = self.provider.name(),
            model = %self.model,
            structured = request.response_format.is_some(),
            "sending completion request"
        );

        let call = self.provider.complete(request);
        let response = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                CompletionError::TransportFailure(format!(
                    "provider call timed out after {}ms",
                    limit.as_millis()
                ))
            })?,
            None => call.await,
        };

        response.map_err(CompletionError::from)
    }
}

fn check_user_message(user_message: &str) -> Result<(), CompletionError> {
    if user_message.trim().is_empty() {
        return Err(CompletionError::InvalidRequest(
            "user message must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn check_temperature(temperature: f32) -> Result<(), CompletionError> {
    if !(0.0..=1.0).contains(&temperature) {
        return Err(CompletionError::InvalidRequest(format!(
            "temperature {temperature} outside [0, 1]"
        )));
    }
    Ok(())
}

fn reply_content(response: &CompletionResponse) -> Result<&str, CompletionError> {
    if let Some(refusal) = response.message.refusal.as_deref() {
        return Err(CompletionError::EmptyResponse(format!("model refused: {refusal}")));
    }

    match response.message.text().map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text),
        _ => Err(CompletionError::EmptyResponse(
            "reply contained no content".to_string(),
        )),
    }
}
