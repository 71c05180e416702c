// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::board::BoardKind;

/// The board operation that produced a [`BoardError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoardOp {
    Start,
    Stop,
    Sample,
}

impl fmt::Display for BoardOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BoardOp::Start => "start",
            BoardOp::Stop => "stop",
            BoardOp::Sample => "sample",
        };
        f.write_str(name)
    }
}

/// A failure confined to a single board.
///
/// These are always recovered by the orchestrator: the board is reported and
/// dropped from the phase it failed in, the rest of the fleet carries on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BoardError {
    #[error("board {index}: {op} failed: {message}")]
    Failed {
        index: usize,
        op: BoardOp,
        message: String,
    },

    #[error("board {index}: burn-in is not supported on {kind} boards")]
    Unsupported { index: usize, kind: BoardKind },

    #[error("board {index}: no workload image for {kind} boards: {message}")]
    MissingWorkload {
        index: usize,
        kind: BoardKind,
        message: String,
    },
}

impl BoardError {
    pub fn failed(index: usize, op: BoardOp, message: impl Into<String>) -> Self {
        BoardError::Failed {
            index,
            op,
            message: message.into(),
        }
    }

    pub fn index(&self) -> usize {
        match self {
            BoardError::Failed { index, .. }
            | BoardError::Unsupported { index, .. }
            | BoardError::MissingWorkload { index, .. } => *index,
        }
    }
}

/// Errors raised while reading a reset configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read reset file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Please check the format of the reset file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Process level failures. Any of these turns into a non-zero exit code.
#[derive(Debug, Error)]
pub enum BurninError {
    #[error("No Tenstorrent devices detected")]
    NoDevices,

    #[error("Failed to enumerate devices: {0}")]
    Enumeration(String),

    #[error("Reset failed: {0}")]
    ResetFailed(String),

    #[error("No boards survived the reset")]
    NoBoardsAfterReset,

    #[error("Burn-in failed to start on every board")]
    NoBoardsStarted,

    #[error("{failures} board failures exceeded the configured limit of {limit}")]
    FailureBudgetExceeded { failures: usize, limit: usize },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Dashboard error: {0}")]
    Dashboard(#[from] std::io::Error),
}
