// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use crate::reset::ResetPlan;
use crate::workload::{WorkloadLibrary, WorkloadSettings};

/// Everything a run needs, resolved and validated before any device is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurninConfig {
    pub reset_plan: ResetPlan,
    pub library: WorkloadLibrary,
    pub workload: WorkloadSettings,
    /// Dashboard refresh period.
    pub interval: Duration,
    /// Abort once more than this many board level failures pile up.
    pub max_board_failures: Option<usize>,
}

impl Default for BurninConfig {
    fn default() -> Self {
        Self {
            reset_plan: ResetPlan::host(),
            library: WorkloadLibrary::default(),
            workload: WorkloadSettings::default(),
            interval: Duration::from_millis(500),
            max_board_failures: None,
        }
    }
}
