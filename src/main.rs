// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::process::ExitCode;

use clap::Parser;

use tt_burnin::cli::CommandLineArguments;
use tt_burnin::dashboard::TerminalDashboard;
use tt_burnin::luwen_host::LuwenHost;
use tt_burnin::session::StdinPrompt;
use tt_burnin::{Orchestrator, StopReason};

fn main() -> ExitCode {
    let args = CommandLineArguments::parse();
    tt_burnin::init_logging();

    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let host = LuwenHost::new(config.library.clone(), config.workload);
    let dashboard = TerminalDashboard::new(config.interval);
    let mut orchestrator = Orchestrator::new(&host, dashboard, StdinPrompt, &config);

    let stop = orchestrator.stop_signal();
    if let Err(e) = ctrlc::set_handler(move || {
        stop.trigger(StopReason::Interrupted);
    }) {
        tracing::warn!("Failed to install Ctrl-C handler: {e}");
    }

    match orchestrator.run() {
        Ok(report) if report.success() => ExitCode::SUCCESS,
        Ok(report) => {
            tracing::warn!(
                "Burn-in did not complete cleanly ({})",
                report
                    .stop_reason
                    .map(|reason| reason.to_string())
                    .unwrap_or_else(|| "aborted".to_string())
            );
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
