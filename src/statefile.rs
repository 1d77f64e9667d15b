//! Local record of reconciled resources
//!
//! Maps each resource name to its remote identity and last observed state,
//! so later runs can find what an earlier apply created.

use crate::controlplane::orchestrator::{ApplyAction, ApplyReport, ResourceTarget};
use crate::domain::state::{ObservedState, ResourceId};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub kind: String,
    pub id: ResourceId,
    /// `None` when the last apply failed before the resource settled
    pub observed: Option<ObservedState>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    pub version: u32,
    pub resources: BTreeMap<String, StateEntry>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            resources: BTreeMap::new(),
        }
    }
}

impl StateFile {
    /// Load from `path`; a missing file is an empty state
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No state file, starting empty");
            return Ok(Self::default());
        }
        let source = std::fs::read_to_string(path)?;
        let state: StateFile = serde_json::from_str(&source)?;
        if state.version != FORMAT_VERSION {
            return Err(Error::Configuration(format!(
                "state file {} has version {}, expected {}",
                path.display(),
                state.version,
                FORMAT_VERSION
            )));
        }
        Ok(state)
    }

    /// Write to `path` through a temporary file and rename
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, path)?;
        debug!(path = %path.display(), resources = self.resources.len(), "Saved state file");
        Ok(())
    }

    pub fn id_of(&self, name: &str) -> Option<ResourceId> {
        self.resources.get(name).map(|e| e.id.clone())
    }

    /// Fold an apply or destroy report into the recorded state
    ///
    /// Failed entries that left a remote object behind are kept so a later
    /// destroy can clean them up.
    pub fn record(&mut self, report: &ApplyReport) {
        let now = Utc::now();
        for entry in &report.entries {
            match &entry.outcome {
                Ok(applied) if applied.action == ApplyAction::Deleted => {
                    self.resources.remove(&entry.name);
                }
                Ok(applied) => {
                    self.resources.insert(
                        entry.name.clone(),
                        StateEntry {
                            kind: entry.kind.clone(),
                            id: applied.id.clone(),
                            observed: applied.observed.clone(),
                            updated_at: now,
                        },
                    );
                }
                Err(e) => {
                    if let Some(id) = e.resource_id() {
                        warn!(name = %entry.name, id = %id, "Recording partially reconciled resource");
                        self.resources.insert(
                            entry.name.clone(),
                            StateEntry {
                                kind: entry.kind.clone(),
                                id: id.clone(),
                                observed: None,
                                updated_at: now,
                            },
                        );
                    }
                }
            }
        }
    }

    /// Every recorded resource as a destroy target
    pub fn targets(&self) -> Vec<ResourceTarget> {
        self.resources
            .iter()
            .map(|(name, entry)| ResourceTarget {
                kind: entry.kind.clone(),
                name: name.clone(),
                id: entry.id.clone(),
            })
            .collect()
    }

    /// Recorded resources whose names are not in `declared`
    pub fn orphans<'a>(&'a self, declared: &'a [&str]) -> impl Iterator<Item = ResourceTarget> + 'a {
        self.targets()
            .into_iter()
            .filter(move |t| !declared.contains(&t.name.as_str()))
    }
}
