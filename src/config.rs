//! Provider configuration and desired-state documents

use crate::controlplane::engine::EngineConfig;
use crate::controlplane::orchestrator::{OrchestratorConfig, ResourceSpec};
use crate::controlplane::poller::{PollSettings, PollStrategy};
use crate::domain::state::DesiredState;
use crate::error::{Error, Result};
use crate::remote::RemoteConfig;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Provider Configuration
// =============================================================================

/// Poll loop settings as written in configuration files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_secs: u64,
    pub max_wait_secs: u64,
    /// `fixed` or `exponential`
    pub strategy: String,
    pub multiplier: f64,
    pub max_interval_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        let defaults = PollSettings::default();
        Self {
            interval_secs: defaults.interval.as_secs(),
            max_wait_secs: defaults.max_wait.as_secs(),
            strategy: "fixed".to_string(),
            multiplier: 2.0,
            max_interval_secs: 60,
        }
    }
}

impl PollConfig {
    pub fn settings(&self) -> Result<PollSettings> {
        if self.interval_secs == 0 {
            return Err(Error::Configuration(
                "poll interval must be at least one second".to_string(),
            ));
        }
        let strategy = match self.strategy.to_lowercase().as_str() {
            "fixed" => PollStrategy::Fixed,
            "exponential" => PollStrategy::Exponential {
                multiplier: self.multiplier,
                max_interval: Duration::from_secs(self.max_interval_secs),
            },
            other => {
                return Err(Error::Configuration(format!(
                    "unknown poll strategy '{}', expected fixed or exponential",
                    other
                )))
            }
        };
        Ok(PollSettings {
            interval: Duration::from_secs(self.interval_secs),
            max_wait: Duration::from_secs(self.max_wait_secs),
            strategy,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub poll: PollConfig,
    pub wait_for_settled: bool,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            poll: PollConfig::default(),
            wait_for_settled: true,
        }
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub remote: RemoteConfig,
    pub engine: EngineSection,
    pub max_concurrent: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            remote: RemoteConfig::default(),
            engine: EngineSection::default(),
            max_concurrent: OrchestratorConfig::default().max_concurrent,
        }
    }
}

impl ProviderConfig {
    pub fn from_yaml(source: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_yaml(&source)
    }

    pub fn engine_config(&self) -> Result<EngineConfig> {
        Ok(EngineConfig {
            poll: self.engine.poll.settings()?,
            wait_for_settled: self.engine.wait_for_settled,
        })
    }

    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig> {
        if self.max_concurrent == 0 {
            return Err(Error::Configuration(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        Ok(OrchestratorConfig {
            max_concurrent: self.max_concurrent,
            engine: self.engine_config()?,
        })
    }
}

// =============================================================================
// Desired Document
// =============================================================================

/// One declared resource
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DesiredResource {
    /// Resource kind, e.g. `oci_core_internet_gateway`
    pub kind: String,
    /// Local name, unique within the document
    pub name: String,
    /// Attribute values keyed by attribute name
    #[serde(default)]
    #[schemars(with = "BTreeMap<String, serde_json::Value>")]
    pub attributes: DesiredState,
}

/// A list of declared resources, read from YAML or JSON
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct DesiredDocument {
    #[serde(default)]
    pub resources: Vec<DesiredResource>,
}

impl DesiredDocument {
    pub fn from_yaml(source: &str) -> Result<Self> {
        let document: Self = serde_yaml::from_str(source)?;
        document.validate()?;
        Ok(document)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_yaml(&source)
    }

    /// JSON Schema of the document format
    pub fn json_schema() -> Result<String> {
        let schema = schemars::schema_for!(DesiredDocument);
        Ok(serde_json::to_string_pretty(&schema)?)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for resource in &self.resources {
            if resource.name.is_empty() {
                return Err(Error::Configuration(format!(
                    "a {} resource has an empty name",
                    resource.kind
                )));
            }
            if !seen.insert(resource.name.as_str()) {
                return Err(Error::Configuration(format!(
                    "resource name '{}' is declared more than once",
                    resource.name
                )));
            }
        }
        Ok(())
    }

    /// Orchestrator requests, with ids looked up by resource name
    pub fn specs<F>(&self, mut id_of: F) -> Vec<ResourceSpec>
    where
        F: FnMut(&str) -> Option<crate::domain::state::ResourceId>,
    {
        self.resources
            .iter()
            .map(|r| ResourceSpec {
                kind: r.kind.clone(),
                name: r.name.clone(),
                desired: r.attributes.clone(),
                id: id_of(&r.name),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value::Value;
    use crate::remote::RemoteKind;
    use assert_matches::assert_matches;

    #[test]
    fn test_provider_defaults() {
        let config = ProviderConfig::from_yaml("{}").unwrap();
        assert_eq!(config.remote.kind, RemoteKind::Memory);
        assert_eq!(config.max_concurrent, 8);

        let engine = config.engine_config().unwrap();
        assert_eq!(engine.poll, PollSettings::default());
        assert!(engine.wait_for_settled);
    }

    #[test]
    fn test_provider_from_yaml() {
        let config = ProviderConfig::from_yaml(
            r#"
remote:
  kind: rest
  rest:
    endpoint: https://iaas.us-phoenix-1.example.com/20160918
engine:
  poll:
    interval_secs: 2
    max_wait_secs: 30
    strategy: exponential
    max_interval_secs: 10
max_concurrent: 4
"#,
        )
        .unwrap();

        assert_eq!(config.remote.kind, RemoteKind::Rest);
        let orchestrator = config.orchestrator_config().unwrap();
        assert_eq!(orchestrator.max_concurrent, 4);
        assert_eq!(orchestrator.engine.poll.interval, Duration::from_secs(2));
        assert_matches!(
            orchestrator.engine.poll.strategy,
            PollStrategy::Exponential { max_interval, .. } if max_interval == Duration::from_secs(10)
        );
    }

    #[test]
    fn test_invalid_provider_config() {
        let bad_strategy = ProviderConfig::from_yaml("engine:\n  poll:\n    strategy: random\n").unwrap();
        assert_matches!(bad_strategy.engine_config(), Err(Error::Configuration(_)));

        let zero = ProviderConfig::from_yaml("max_concurrent: 0\n").unwrap();
        assert_matches!(zero.orchestrator_config(), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_document_keeps_attribute_order() {
        let document = DesiredDocument::from_yaml(
            r#"
resources:
  - kind: oci_core_internet_gateway
    name: gw
    attributes:
      vcn_id: ocid1.vcn.1
      compartment_id: ocid1.compartment.1
      enabled: false
      freeform_tags:
        Department: Finance
"#,
        )
        .unwrap();

        let gw = &document.resources[0];
        let names: Vec<&str> = gw.attributes.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["vcn_id", "compartment_id", "enabled", "freeform_tags"]);
        assert_eq!(gw.attributes.get("enabled"), Some(&Value::from(false)));

        let specs = document.specs(|_| None);
        assert_eq!(specs[0].name, "gw");
        assert!(specs[0].id.is_none());
    }

    #[test]
    fn test_document_rejects_duplicates() {
        let err = DesiredDocument::from_yaml(
            r#"
resources:
  - {kind: oci_identity_user, name: alice}
  - {kind: oci_identity_user, name: alice}
"#,
        )
        .unwrap_err();
        assert_matches!(err, Error::Configuration(_));
    }

    #[test]
    fn test_document_schema() {
        let schema = DesiredDocument::json_schema().unwrap();
        assert!(schema.contains("DesiredResource"));
        assert!(schema.contains("attributes"));
    }
}
