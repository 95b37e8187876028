//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::compile::CorrelationStyle;
use crate::error::{TriggerError, TriggerResult};

/// Hard ceiling on nested trigger firing.
pub const MAX_RECURSION_CEILING: usize = 32;

/// Tunables of a [`crate::TriggerEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Maximum nesting depth of trigger states.
    pub max_depth: usize,
    /// Executions after which a compiled activity is rebuilt; 0 disables.
    pub recompile_threshold: u32,
    /// Correlation naming convention.
    pub correlation_style: CorrelationStyle,
    /// Global firing switch.
    pub firing_enabled: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            max_depth: MAX_RECURSION_CEILING,
            recompile_threshold: 200,
            correlation_style: CorrelationStyle::Paired,
            firing_enabled: true,
        }
    }
}

impl TriggerConfig {
    /// Clamp a requested depth into `1..=MAX_RECURSION_CEILING`.
    #[must_use]
    pub fn clamp_depth(depth: usize) -> usize {
        depth.clamp(1, MAX_RECURSION_CEILING)
    }

    /// Normalize out-of-range values.
    #[must_use]
    pub fn validated(mut self) -> Self {
        self.max_depth = Self::clamp_depth(self.max_depth);
        self
    }

    /// Load from a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    /// `TriggerError::Config` when the document does not parse.
    pub fn from_json(json: &str) -> TriggerResult<Self> {
        serde_json::from_str::<Self>(json)
            .map(Self::validated)
            .map_err(|e| TriggerError::Config {
                message: format!("invalid trigger config: {e}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = TriggerConfig::default();
        assert_eq!(cfg.max_depth, 32);
        assert_eq!(cfg.recompile_threshold, 200);
        assert_eq!(cfg.correlation_style, CorrelationStyle::Paired);
        assert!(cfg.firing_enabled);
    }

    #[test]
    fn from_json_fills_defaults_and_clamps() {
        let cfg = TriggerConfig::from_json(r#"{"max_depth": 500, "correlation_style": "legacy"}"#).unwrap();
        assert_eq!(cfg.max_depth, MAX_RECURSION_CEILING);
        assert_eq!(cfg.correlation_style, CorrelationStyle::Legacy);
        assert_eq!(cfg.recompile_threshold, 200);

        let cfg = TriggerConfig::from_json(r#"{"max_depth": 0}"#).unwrap();
        assert_eq!(cfg.max_depth, 1);
    }

    #[test]
    fn from_json_rejects_garbage() {
        let err = TriggerConfig::from_json("{max_depth:").unwrap_err();
        assert!(matches!(err, TriggerError::Config { .. }));
    }
}
