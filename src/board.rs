// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! The narrow interface the orchestrator drives.
//!
//! A [`Host`] enumerates and resets boards, a [`Board`] starts/stops the
//! burn-in workload and produces telemetry samples. Everything that touches
//! registers lives behind these two traits so the orchestration can be
//! exercised without hardware.

use std::fmt;

use crate::error::{BoardError, BurninError};
use crate::reset::{ResetOutcome, ResetPlan};

/// Readings at or above this fraction of their limit are flagged.
pub const NEAR_LIMIT_FRACTION: f64 = 0.85;

/// The closed set of board families the driver library understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BoardKind {
    Grayskull,
    Wormhole,
    Blackhole,
}

impl BoardKind {
    /// Series name shown to the operator.
    pub fn series(&self) -> &'static str {
        match self {
            BoardKind::Grayskull => "Grayskull",
            BoardKind::Wormhole => "Wormhole",
            BoardKind::Blackhole => "Blackhole",
        }
    }

    /// Sub-directory of the workload library holding this kind's image.
    pub fn workload_dir_name(&self) -> &'static str {
        match self {
            BoardKind::Grayskull => "grayskull",
            BoardKind::Wormhole => "wormhole",
            BoardKind::Blackhole => "blackhole",
        }
    }
}

impl fmt::Display for BoardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.series())
    }
}

/// Mesh coordinates of a chip as reported by its ethernet firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshCoord {
    pub shelf_x: u8,
    pub shelf_y: u8,
    pub rack_x: u8,
    pub rack_y: u8,
}

impl fmt::Display for MeshCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.shelf_x, self.shelf_y, self.rack_x, self.rack_y
        )
    }
}

/// Identifying metadata captured when a board is enumerated. Display only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardDescriptor {
    /// Position in the enumeration that produced this descriptor.
    pub index: usize,
    /// N in /dev/tenstorrent/N, `None` for chips reached over ethernet.
    pub interface: Option<usize>,
    pub kind: BoardKind,
    pub board_type: String,
    pub serial: u64,
    pub coord: Option<MeshCoord>,
}

impl BoardDescriptor {
    pub fn pci_id(&self) -> String {
        self.interface
            .map(|id| id.to_string())
            .unwrap_or_else(|| "N/A".to_string())
    }

    pub fn board_number(&self) -> String {
        format!("{:x}", self.serial)
    }

    pub fn coordinates(&self) -> String {
        self.coord
            .map(|c| c.to_string())
            .unwrap_or_else(|| "N/A".to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Nominal,
    NearLimit,
}

/// One metric: the instantaneous value and the limit it is scaled against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub value: f64,
    pub max: f64,
}

impl Reading {
    pub fn new(value: f64, max: f64) -> Self {
        Self { value, max }
    }

    pub fn level(&self) -> Level {
        if self.value < self.max * NEAR_LIMIT_FRACTION {
            Level::Nominal
        } else {
            Level::NearLimit
        }
    }
}

/// A single telemetry tick for one board.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetrySample {
    pub voltage: Reading,
    pub current: Reading,
    pub aiclk: Reading,
    pub power: Reading,
    pub temperature: Reading,
}

/// A sample tagged with the board it came from, as handed to the dashboard.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardSample {
    pub index: usize,
    pub sample: TelemetrySample,
}

/// Handle to one physical board.
///
/// Each call only ever touches its own board, so handles are driven from
/// separate threads during the start/stop fan-outs.
pub trait Board: Send + Sync {
    fn descriptor(&self) -> &BoardDescriptor;

    fn start_workload(&self) -> Result<(), BoardError>;

    fn stop_workload(&self) -> Result<(), BoardError>;

    fn sample(&self) -> Result<TelemetrySample, BoardError>;
}

/// The machine the boards are plugged into.
pub trait Host: Sync {
    type Board: Board;

    /// Discover all boards. Handles from a previous call must not be used
    /// after a reset.
    fn enumerate(&self) -> Result<Vec<Self::Board>, BurninError>;

    /// Bring the boards covered by `plan` back to a known-good state.
    fn reset(&self, plan: &ResetPlan) -> Result<ResetOutcome, BurninError>;
}
