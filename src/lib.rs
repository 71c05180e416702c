// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Burn-in for Tenstorrent accelerators.
//!
//! Resets every board, starts a power-virus workload on all of them at once,
//! shows live telemetry until the operator presses Enter, then stops the
//! workload and resets the boards again.

pub mod board;
pub mod cli;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod luwen_host;
pub mod orchestrator;
pub mod reset;
pub mod session;
pub mod workload;

pub use board::{Board, BoardDescriptor, BoardKind, BoardSample, Host, TelemetrySample};
pub use config::BurninConfig;
pub use error::{BoardError, BurninError};
pub use orchestrator::{Orchestrator, RunReport};
pub use session::{StopReason, StopSignal};

/// Log to stderr, `RUST_LOG` overriding the default of `tt_burnin=info`.
pub fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tt_burnin=info".into());
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr));
    if let Err(e) = registry.try_init() {
        eprintln!("Failed to install the log subscriber: {e}");
    }
}
