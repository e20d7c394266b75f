//! Model configuration.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{NerError, Result};

/// Dimensions and entity inventory for a [`TransitionNer`](crate::TransitionNer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NerConfig {
    /// Size of the token representation pushed onto the buffer.
    pub token_dim: usize,

    /// Hidden size of every stack LSTM and of the scorer's hidden layer.
    pub hidden_dim: usize,

    /// Size of the action and relation embeddings.
    pub action_dim: usize,

    /// Dropout probability, active only while training.
    pub dropout: f32,

    /// 1 for plain stack LSTMs, 2 for the two-layer variant.
    pub stack_layers: usize,

    /// Entity types; one REDUCE action is created per entry.
    pub entity_types: Vec<String>,
}

impl Default for NerConfig {
    fn default() -> Self {
        Self {
            token_dim: 100,
            hidden_dim: 100,
            action_dim: 20,
            dropout: 0.5,
            stack_layers: 1,
            entity_types: ["PER", "LOC", "ORG", "MISC"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
        }
    }
}

impl NerConfig {
    /// Small dimensions for tests and demos.
    pub fn tiny() -> Self {
        Self {
            token_dim: 8,
            hidden_dim: 6,
            action_dim: 4,
            ..Default::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.token_dim == 0 || self.hidden_dim == 0 || self.action_dim == 0 {
            return Err(NerError::InvalidConfig(
                "token_dim, hidden_dim and action_dim must be greater than 0".into(),
            ));
        }

        if !(0.0..1.0).contains(&self.dropout) {
            return Err(NerError::InvalidConfig(format!(
                "dropout must be in [0.0, 1.0), got {}",
                self.dropout
            )));
        }

        if !matches!(self.stack_layers, 1 | 2) {
            return Err(NerError::InvalidConfig(format!(
                "stack_layers must be 1 or 2, got {}",
                self.stack_layers
            )));
        }

        if self.entity_types.is_empty() {
            return Err(NerError::InvalidConfig(
                "at least one entity type is required".into(),
            ));
        }

        let mut seen = HashSet::new();
        for kind in &self.entity_types {
            if kind.is_empty() || kind.chars().any(char::is_whitespace) {
                return Err(NerError::InvalidConfig(format!(
                    "entity type {kind:?} must be non-empty without whitespace"
                )));
            }
            if !seen.insert(kind.as_str()) {
                return Err(NerError::InvalidConfig(format!(
                    "duplicate entity type {kind}"
                )));
            }
        }

        Ok(())
    }
}
