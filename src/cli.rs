// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::config::BurninConfig;
use crate::error::ConfigError;
use crate::reset::ResetPlan;
use crate::workload::{WorkloadLibrary, WorkloadSettings};

/// Run a sustained high-power workload on every Tenstorrent board in the
/// host until Enter is pressed, resetting the boards before and after.
#[derive(Parser, Debug)]
#[command(name = "tt-burnin", author, version, about, long_about = None)]
#[command(disable_version_flag = true)]
pub struct CommandLineArguments {
    /// Print version
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    #[allow(dead_code)]
    version: Option<bool>,

    /// Reset config file, as generated by `tt-smi -g`
    #[arg(long = "reset_file", visible_alias = "reset-file", value_name = "PATH")]
    pub reset_file: Option<PathBuf>,

    /// Directory holding one workload bundle per board series
    #[arg(
        long = "workload_dir",
        visible_alias = "workload-dir",
        value_name = "DIR",
        default_value = WorkloadLibrary::DEFAULT_ROOT
    )]
    pub workload_dir: PathBuf,

    /// Milliseconds in between dashboard refreshes
    #[arg(
        long,
        value_name = "MS",
        default_value_t = 500,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub interval: u64,

    /// Abort once more than N board failures have accumulated
    #[arg(
        long = "max_board_failures",
        visible_alias = "max-board-failures",
        value_name = "N"
    )]
    pub max_board_failures: Option<usize>,

    /// Stagger the start of the tensix cores
    #[arg(long = "stagger_start", visible_alias = "stagger-start")]
    pub stagger_start: bool,

    /// Only release BRISC and NCRISC from reset
    #[arg(long = "keep_trisc_under_reset", visible_alias = "keep-trisc-under-reset")]
    pub keep_trisc_under_reset: bool,

    /// Read the workload back from every core after loading it
    #[arg(long = "verify_load", visible_alias = "verify-load")]
    pub verify_load: bool,
}

impl CommandLineArguments {
    /// Resolve the arguments. Reads the reset file but touches no device.
    pub fn into_config(self) -> Result<BurninConfig, ConfigError> {
        Ok(BurninConfig {
            reset_plan: ResetPlan::resolve(self.reset_file.as_deref())?,
            library: WorkloadLibrary::new(self.workload_dir),
            workload: WorkloadSettings {
                stagger_start: self.stagger_start,
                keep_trisc_under_reset: self.keep_trisc_under_reset,
                verify_load: self.verify_load,
            },
            interval: Duration::from_millis(self.interval),
            max_board_failures: self.max_board_failures,
        })
    }
}
