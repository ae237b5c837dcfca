use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{pipeline::InquiryCategory, providers::scripted::ScriptedReply};

#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    #[error("failed to read fixture {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse fixture {name}: {source}")]
    Parse {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid fixture {name}: {reason}")]
    Invalid { name: String, reason: String },
    #[error("unknown fixture: {0}")]
    Missing(String),
}

/// A literal customer message paired with the properties its result must have.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestFixture {
    pub message: String,
    pub expected_category: InquiryCategory,
    pub expected_min_response_length: usize,
    /// A previously captured model reply, replayed when running offline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_output: Option<Value>,
}

/// Read-only fixtures keyed by name, iterated in name order.
#[derive(Debug, Clone, Default)]
pub struct FixtureSet {
    fixtures: BTreeMap<String, TestFixture>,
}

impl FixtureSet {
    /// Loads every `*.json` file in `dir`; the file stem is the fixture name.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, FixtureError> {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir).map_err(|source| FixtureError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut set = Self::default();
        for entry in entries {
            let path = entry
                .map_err(|source| FixtureError::Io {
                    path: dir.to_path_buf(),
                    source,
                })?
                .path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }

            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            let content = fs::read_to_string(&path).map_err(|source| FixtureError::Io {
                path: path.clone(),
                source,
            })?;
            set = set.with_json(name, &content)?;
        }

        tracing::info!(dir = %dir.display(), fixtures = set.len(), "fixtures loaded");
        Ok(set)
    }

    pub fn with_json(self, name: impl Into<String>, json: &str) -> Result<Self, FixtureError> {
        let name = name.into();
        let fixture = serde_json::from_str(json).map_err(|source| FixtureError::Parse {
            name: name.clone(),
            source,
        })?;
        self.with_fixture(name, fixture)
    }

    /// Every fixture must reach the provider exactly once, so a message the
    /// client would reject up front is refused here.
    pub fn with_fixture(
        mut self,
        name: impl Into<String>,
        fixture: TestFixture,
    ) -> Result<Self, FixtureError> {
        let name = name.into();
        if fixture.message.trim().is_empty() {
            return Err(FixtureError::Invalid {
                name,
                reason: "message is blank".to_string(),
            });
        }
        self.fixtures.insert(name, fixture);
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Result<&TestFixture, FixtureError> {
        self.fixtures
            .get(name)
            .ok_or_else(|| FixtureError::Missing(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TestFixture)> {
        self.fixtures.iter().map(|(name, fixture)| (name.as_str(), fixture))
    }

    pub fn len(&self) -> usize {
        self.fixtures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixtures.is_empty()
    }

    /// Recorded replies in iteration order, for a scripted provider. A
    /// fixture without one yields a provider failure for its test.
    pub fn recorded_replies(&self) -> Vec<ScriptedReply> {
        self.iter()
            .map(|(name, fixture)| match &fixture.recorded_output {
                Some(output) => ScriptedReply::json(output),
                None => ScriptedReply::Failure(format!("fixture {name} has no recorded output")),
            })
            .collect()
    }
}
