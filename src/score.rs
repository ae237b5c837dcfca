use std::{fmt, sync::Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RegistrationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScoreDataType {
    Boolean,
    Numeric,
    Categorical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreCategory {
    pub label: String,
    pub value: f64,
}

/// A named scoring dimension annotators grade recorded traces against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreConfig {
    pub name: String,
    pub data_type: ScoreDataType,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<ScoreCategory>>,
}

impl ScoreConfig {
    pub fn new(
        name: impl Into<String>,
        data_type: ScoreDataType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            data_type,
            description: description.into(),
            min_value: None,
            max_value: None,
            categories: None,
        }
    }

    /// Binary quality verdict used for human annotation of inquiry runs.
    pub fn pass() -> Self {
        Self::new(
            "Pass",
            ScoreDataType::Boolean,
            "Binary quality assessment: 1 for good quality, 0 for poor quality",
        )
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min_value = Some(min);
        self.max_value = Some(max);
        self
    }

    pub fn with_category(mut self, label: impl Into<String>, value: f64) -> Self {
        self.categories
            .get_or_insert_with(Vec::new)
            .push(ScoreCategory {
                label: label.into(),
                value,
            });
        self
    }

    pub fn validate(&self) -> Result<(), RegistrationError> {
        if self.name.trim().is_empty() {
            return Err(RegistrationError::Invalid("name must not be empty".to_string()));
        }

        match self.data_type {
            ScoreDataType::Numeric => {
                if let (Some(min), Some(max)) = (self.min_value, self.max_value) {
                    if min > max {
                        return Err(RegistrationError::Invalid(format!(
                            "min_value {min} exceeds max_value {max}"
                        )));
                    }
                }
            }
            ScoreDataType::Categorical => {
                if self.categories.as_ref().map_or(true, Vec::is_empty) {
                    return Err(RegistrationError::Invalid(
                        "categorical configs need at least one category".to_string(),
                    ));
                }
            }
            ScoreDataType::Boolean => {}
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreConfigId(pub String);

impl fmt::Display for ScoreConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registers score configs with a backend. Whether a duplicate name fails or
/// returns the existing id is the backend's call; callers register once per
/// config lifetime.
#[async_trait]
pub trait ScoreConfigRegistry: Send + Sync {
    async fn register(&self, config: &ScoreConfig) -> Result<ScoreConfigId, RegistrationError>;
}

/// Registry kept in process memory. Rejects duplicate names.
#[derive(Debug, Default)]
pub struct InMemoryScoreRegistry {
    configs: Mutex<Vec<(ScoreConfigId, ScoreConfig)>>,
}

impl InMemoryScoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configs(&self) -> Vec<(ScoreConfigId, ScoreConfig)> {
        self.configs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScoreConfigRegistry for InMemoryScoreRegistry {
    async fn register(&self, config: &ScoreConfig) -> Result<ScoreConfigId, RegistrationError> {
        config.validate()?;

        let mut configs = self.configs.lock().unwrap();
        if configs.iter().any(|(_, existing)| existing.name == config.name) {
            return Err(RegistrationError::DuplicateName(config.name.clone()));
        }

        let id = ScoreConfigId(Uuid::new_v4().to_string());
        configs.push((id.clone(), config.clone()));
        tracing::info!(id = %id, name = %config.name, data_type = ?config.data_type, "score config registered");
        Ok(id)
    }
}
