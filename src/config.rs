//! Pipeline configuration (§6.2, C11). Deserialized from already-validated
//! JSON — schema validation and file loading are out of scope (§1) — and
//! tolerant of unknown fields, since downstream tooling is expected to
//! carry config keys this crate doesn't understand yet.

use serde::{Deserialize, Serialize};

fn default_namespace() -> String {
    "default".to_string()
}

/// One entry in `pipeline: [...]` (§6.2): which plugin to use for a given
/// stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSelection {
    pub stage: String,
    pub name: String,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ParallelConfig {
    #[serde(default)]
    pub enabled: bool,
    pub max_concurrency: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CachingConfig {
    #[serde(default)]
    pub enabled: bool,
    pub max_size: Option<usize>,
    pub ttl: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PerformanceConfig {
    #[serde(default)]
    pub parallel: ParallelConfig,
    #[serde(default)]
    pub caching: CachingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    #[serde(default)]
    pub structured: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Metadata {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// §6.2's normalised configuration record. Unknown JSON fields are
/// accepted (no `deny_unknown_fields`), matching "the core treats unknown
/// fields as inert".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub pipeline: Vec<PluginSelection>,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pipeline: Vec::new(),
            performance: PerformanceConfig::default(),
            observability: ObservabilityConfig::default(),
            namespace: default_namespace(),
            metadata: Metadata::default(),
        }
    }
}

impl PipelineConfig {
    /// Looks up the registered plugin name selected for `stage`, if any.
    pub fn plugin_for_stage(&self, stage: &str) -> Option<&str> {
        self.pipeline
            .iter()
            .find(|p| p.stage == stage)
            .map(|p| p.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_fields_are_tolerated() {
        let raw = serde_json::json!({
            "pipeline": [{"stage": "loader", "name": "fs"}],
            "totallyUnknownField": {"nested": true},
        });
        let config: PipelineConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(config.namespace, "default");
        assert_eq!(config.plugin_for_stage("loader"), Some("fs"));
    }

    #[test]
    fn namespace_defaults_when_absent() {
        let config: PipelineConfig = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(config.namespace, "default");
    }

    #[test]
    fn explicit_namespace_is_honored() {
        let raw = serde_json::json!({"namespace": "acme"});
        let config: PipelineConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(config.namespace, "acme");
    }
}
