// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Reset planning.
//!
//! A [`ResetPlan`] decides which PCI interfaces get reset; it is built either
//! from the default "whole host" scope or from a reset configuration file as
//! generated by `tt-smi -g`. The plan is resolved once at startup and reused
//! for the cleanup reset so both resets cover the same boards.
//!
//! ```json
//! {
//!     "gs_tensix_reset": { "pci_index": [0] },
//!     "wh_link_reset": { "pci_index": [1, 2] },
//!     "re_init_devices": true,
//!     "wh_mobo_reset": [{ "mobo": "mobo-1", "nb_host_pci_idx": [1] }]
//! }
//! ```

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Placeholder left in generated reset files for unnamed motherboards.
const MOBO_PLACEHOLDER: &str = "MOBO NAME";

/// Which boards a reset applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetScope {
    /// Every interface present on the host.
    Host,
    /// Only the listed PCI interfaces.
    Boards(Vec<usize>),
}

/// Options for a reset, resolved before any device is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetPlan {
    pub scope: ResetScope,

    /// Re-initialize boards after the reset completes.
    pub reinit: bool,

    /// How long to wait for every board to come back.
    pub timeout: Duration,

    /// Motherboards named in the reset file. Listed for reporting only.
    pub mobos: Vec<MoboReset>,
}

impl Default for ResetPlan {
    fn default() -> Self {
        Self::host()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MoboReset {
    pub mobo: String,
    #[serde(default)]
    pub nb_host_pci_idx: Vec<usize>,
    #[serde(default)]
    pub credo: bool,
    #[serde(default)]
    pub disabled_ports: Vec<String>,
}

impl fmt::Display for MoboReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (boards {:?}", self.mobo, self.nb_host_pci_idx)?;
        if self.credo {
            f.write_str(", credo")?;
        }
        if !self.disabled_ports.is_empty() {
            write!(f, ", disabled ports {}", self.disabled_ports.join(" "))?;
        }
        f.write_str(")")
    }
}

#[derive(Debug, Default, Deserialize)]
struct PciIndexList {
    #[serde(default)]
    pci_index: Vec<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ResetFile {
    #[serde(default)]
    gs_tensix_reset: Option<PciIndexList>,
    #[serde(default)]
    wh_link_reset: Option<PciIndexList>,
    #[serde(default)]
    re_init_devices: Option<bool>,
    #[serde(default)]
    wh_mobo_reset: Vec<MoboReset>,
}

impl ResetPlan {
    /// Reset every board on the host.
    pub fn host() -> Self {
        Self {
            scope: ResetScope::Host,
            reinit: true,
            timeout: Duration::from_secs(2),
            mobos: Vec::new(),
        }
    }

    /// Resolve the plan for an optional reset file.
    ///
    /// A path that does not exist falls back to [`ResetPlan::host`], a file
    /// that exists but does not parse is an error.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            None => Ok(Self::host()),
            Some(path) if !path.exists() => {
                tracing::warn!(
                    "Reset file {} not found, resetting every board on the host. \
                     To generate a reset config file run tt-smi -g",
                    path.display()
                );
                Ok(Self::host())
            }
            Some(path) => Self::from_file(path),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        let file: ResetFile = serde_json::from_str(data)?;

        let mut interfaces = BTreeSet::new();
        for list in [&file.gs_tensix_reset, &file.wh_link_reset]
            .into_iter()
            .flatten()
        {
            interfaces.extend(list.pci_index.iter().copied());
        }

        let mobos: Vec<MoboReset> = file
            .wh_mobo_reset
            .into_iter()
            .filter(|m| !m.mobo.contains(MOBO_PLACEHOLDER))
            .collect();
        for mobo in &mobos {
            tracing::warn!(
                "Motherboard reset for {mobo} is not performed by tt-burnin; \
                 its boards get a PCI reset instead"
            );
        }

        let scope = if interfaces.is_empty() {
            ResetScope::Host
        } else {
            ResetScope::Boards(interfaces.into_iter().collect())
        };

        Ok(Self {
            scope,
            reinit: file.re_init_devices.unwrap_or(true),
            mobos,
            ..Self::host()
        })
    }

    /// The interfaces to pass to the driver, `None` meaning all of them.
    pub fn interfaces(&self) -> Option<Vec<usize>> {
        match &self.scope {
            ResetScope::Host => None,
            ResetScope::Boards(interfaces) => Some(interfaces.clone()),
        }
    }
}

/// Per-board result of a reset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetOutcome {
    /// Interfaces that were successfully reset
    pub reset: Vec<usize>,

    /// Interfaces that failed to reset, with the reason
    pub failed: Vec<(usize, String)>,

    /// New interfaces that appeared after reset
    pub appeared: Vec<usize>,

    /// Interfaces that did not come back after reset
    pub vanished: Vec<usize>,
}

impl ResetOutcome {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.appeared.is_empty() && self.vanished.is_empty()
    }

    /// Interfaces whose boards must not be used for the rest of the run.
    pub fn excluded(&self) -> HashSet<usize> {
        self.failed
            .iter()
            .map(|(interface, _)| *interface)
            .chain(self.vanished.iter().copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_plan_default() {
        let plan = ResetPlan::default();
        assert_eq!(plan.scope, ResetScope::Host);
        assert!(plan.reinit);
        assert_eq!(plan.timeout, Duration::from_secs(2));
        assert!(plan.interfaces().is_none());
    }

    #[test]
    fn test_reset_file_merges_pci_lists() {
        let plan = ResetPlan::from_json(
            r#"{
                "gs_tensix_reset": {"pci_index": [3]},
                "wh_link_reset": {"pci_index": [1, 0, 3]},
                "re_init_devices": false,
                "time": "2024-01-01"
            }"#,
        )
        .unwrap();
        assert_eq!(plan.scope, ResetScope::Boards(vec![0, 1, 3]));
        assert_eq!(plan.interfaces(), Some(vec![0, 1, 3]));
        assert!(!plan.reinit);
    }

    #[test]
    fn test_reset_file_without_indices_covers_host() {
        let plan = ResetPlan::from_json(r#"{"wh_link_reset": {"pci_index": []}}"#).unwrap();
        assert_eq!(plan.scope, ResetScope::Host);
        assert!(plan.reinit);
    }

    #[test]
    fn test_reset_file_skips_placeholder_mobos() {
        let plan = ResetPlan::from_json(
            r#"{
                "wh_link_reset": {"pci_index": [0, 1]},
                "wh_mobo_reset": [
                    {"mobo": "MOBO NAME", "nb_host_pci_idx": [0]},
                    {"mobo": "galaxy-a", "credo": true, "disabled_ports": ["0:s0:p0"], "nb_host_pci_idx": [1]}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(plan.mobos.len(), 1);
        assert_eq!(plan.mobos[0].mobo, "galaxy-a");
        assert_eq!(
            plan.mobos[0].to_string(),
            "galaxy-a (boards [1], credo, disabled ports 0:s0:p0)"
        );
        // Boards behind a named mobo keep their PCI reset.
        assert_eq!(plan.scope, ResetScope::Boards(vec![0, 1]));
    }

    #[test]
    fn test_reset_file_rejects_bad_types() {
        assert!(ResetPlan::from_json(r#"{"wh_link_reset": {"pci_index": "0"}}"#).is_err());
        assert!(ResetPlan::from_json("not json").is_err());
    }

    #[test]
    fn test_resolve_missing_file_falls_back_to_host() {
        let dir = tempfile::tempdir().unwrap();
        let plan = ResetPlan::resolve(Some(&dir.path().join("missing.json"))).unwrap();
        assert_eq!(plan, ResetPlan::host());
    }

    #[test]
    fn test_resolve_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reset.json");
        std::fs::write(&path, r#"{"wh_link_reset": {"pci_index": [2]}}"#).unwrap();
        let plan = ResetPlan::resolve(Some(&path)).unwrap();
        assert_eq!(plan.scope, ResetScope::Boards(vec![2]));

        std::fs::write(&path, "{").unwrap();
        assert!(matches!(
            ResetPlan::resolve(Some(&path)),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_reset_outcome_exclusions() {
        let outcome = ResetOutcome {
            reset: vec![0, 2],
            failed: vec![(1, "timeout".to_string())],
            appeared: vec![],
            vanished: vec![3],
        };
        assert!(!outcome.is_success());
        let excluded = outcome.excluded();
        assert!(excluded.contains(&1));
        assert!(excluded.contains(&3));
        assert!(!excluded.contains(&0));

        assert!(ResetOutcome {
            reset: vec![0],
            ..Default::default()
        }
        .is_success());
    }
}
