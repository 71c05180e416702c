// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Sequencing of one burn-in run.
//!
//! enumerate -> reset -> re-enumerate -> start on every board -> live
//! dashboard until stopped -> stop on every board -> final reset.
//!
//! Once the first reset has been issued the run owes the boards a final
//! reset. That debt is held by [`Run`], which settles it when the run ends or,
//! failing that, when it is dropped.

use std::collections::HashSet;

use tracing::{error, info, warn};

use crate::board::{Board, BoardSample, Host};
use crate::config::BurninConfig;
use crate::dashboard::Dashboard;
use crate::error::{BoardError, BoardOp, BurninError};
use crate::reset::{ResetOutcome, ResetPlan};
use crate::session::{OperatorPrompt, Session, SessionState, StopReason, StopSignal};

/// What happened during a run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub state: Option<SessionState>,
    pub aborted: bool,
    pub stop_reason: Option<StopReason>,
    /// Indices of the boards the workload was started on
    pub started: Vec<usize>,
    pub start_failures: Vec<BoardError>,
    /// Boards hidden from the dashboard after a failed sample
    pub dropped: Vec<BoardError>,
    pub stop_failures: Vec<BoardError>,
    /// Interfaces excluded after the initial reset
    pub reset_exclusions: Vec<usize>,
    pub board_failures: usize,
    pub final_reset: bool,
    pub history: Vec<SessionState>,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.state == Some(SessionState::Done) && !self.aborted
    }
}

/// Operator markers printed around one board's start or stop.
fn markers(op: BoardOp, index: usize) -> (String, String, String) {
    let (before, after) = match op {
        BoardOp::Stop => ("Stopping", "stopped"),
        _ => ("Starting", "started"),
    };
    (
        format!("{before} burn-in on board {index}"),
        format!("Burn-in {after} on board {index}"),
        format!("Failed to {op} burn-in on board {index}"),
    )
}

/// Run `action` on every board at once and wait for all of them.
fn fan_out<'b, B: Board + 'b>(
    boards: impl IntoIterator<Item = &'b B>,
    op: BoardOp,
    action: fn(&B) -> Result<(), BoardError>,
) -> Vec<(usize, Result<(), BoardError>)> {
    std::thread::scope(|scope| {
        let handles: Vec<_> = boards
            .into_iter()
            .map(|board| {
                let index = board.descriptor().index;
                let handle = scope.spawn(move || {
                    let (before, done, failed) = markers(op, index);
                    println!("{before}");
                    let result = action(board);
                    match &result {
                        Ok(()) => println!("{done}"),
                        Err(e) => {
                            println!("{failed}");
                            error!(board = index, "{e}");
                        }
                    }
                    result
                });
                (index, handle)
            })
            .collect();

        handles
            .into_iter()
            .map(|(index, handle)| {
                let result = handle.join().unwrap_or_else(|_| {
                    let err = BoardError::failed(index, op, "worker thread panicked");
                    error!(board = index, "{err}");
                    Err(err)
                });
                (index, result)
            })
            .collect()
    })
}

struct Run<'h, H: Host> {
    host: &'h H,
    plan: &'h ResetPlan,
    failure_limit: Option<usize>,
    session: Session,
    boards: Vec<H::Board>,
    /// Positions in `boards` whose workload may be running.
    running: Vec<usize>,
    /// A reset has been issued, so the final reset is owed.
    armed: bool,
    finished: bool,
    report: RunReport,
}

impl<'h, H: Host> Run<'h, H> {
    fn new(host: &'h H, plan: &'h ResetPlan, failure_limit: Option<usize>) -> Self {
        Self {
            host,
            plan,
            failure_limit,
            session: Session::default(),
            boards: Vec::new(),
            running: Vec::new(),
            armed: false,
            finished: false,
            report: RunReport::default(),
        }
    }

    fn over_budget(&self) -> bool {
        over_budget(self.report.board_failures, self.failure_limit)
    }

    fn budget_error(&self) -> BurninError {
        BurninError::FailureBudgetExceeded {
            failures: self.report.board_failures,
            limit: self.failure_limit.unwrap_or_default(),
        }
    }

    fn fail(&mut self, err: BurninError) -> Result<(), BurninError> {
        error!("{err}");
        self.session.abort();
        Err(err)
    }

    fn initial_reset(&mut self) -> Result<ResetOutcome, BurninError> {
        // Handles do not survive a reset
        self.boards.clear();
        self.armed = true;

        let outcome = self.host.reset(self.plan)?;
        for (interface, message) in &outcome.failed {
            error!(interface, "Reset failed: {message}");
        }
        for interface in &outcome.vanished {
            error!(interface, "Board did not come back after reset");
        }
        for interface in &outcome.appeared {
            warn!(interface, "New board appeared after reset");
        }
        Ok(outcome)
    }

    fn execute<D: Dashboard, P: OperatorPrompt>(
        &mut self,
        dashboard: &mut D,
        prompt: &P,
        stop: &StopSignal,
    ) -> Result<(), BurninError> {
        let boards = match self.host.enumerate() {
            Ok(boards) => boards,
            Err(e) => return self.fail(e),
        };
        if boards.is_empty() {
            return self.fail(BurninError::NoDevices);
        }
        self.session.advance(SessionState::Enumerated);
        info!("Detected {} boards", boards.len());

        let descriptors: Vec<_> = boards.iter().map(|b| b.descriptor().clone()).collect();
        drop(boards);
        if let Err(e) = dashboard.render_static_table(&descriptors) {
            return self.fail(e.into());
        }

        let outcome = match self.initial_reset() {
            Ok(outcome) => outcome,
            Err(e) => return self.fail(e),
        };
        self.session.advance(SessionState::Reset);

        let excluded = outcome.excluded();
        let boards = match self.host.enumerate() {
            Ok(boards) => boards,
            Err(e) => return self.fail(e),
        };
        let (boards, dropped): (Vec<_>, Vec<_>) = boards.into_iter().partition(|board| {
            board
                .descriptor()
                .interface
                .map_or(true, |interface| !excluded.contains(&interface))
        });
        for board in &dropped {
            warn!(
                board = board.descriptor().index,
                interface = ?board.descriptor().interface,
                "Excluding board that failed to reset"
            );
        }
        let mut exclusions: Vec<usize> = excluded.into_iter().collect();
        exclusions.sort_unstable();
        self.report.board_failures += exclusions.len();
        self.report.reset_exclusions = exclusions;

        if boards.is_empty() {
            return self.fail(BurninError::NoBoardsAfterReset);
        }
        println!("{} boards ready after reset", boards.len());
        self.boards = boards;
        if self.over_budget() {
            let err = self.budget_error();
            return self.fail(err);
        }
        self.session.advance(SessionState::Ready);

        if let Some(reason) = stop.reason() {
            self.report.stop_reason = Some(reason);
            info!("Stop requested ({reason}) before burn-in started");
            self.session.abort();
            return Ok(());
        }

        let results = fan_out(
            &self.boards,
            BoardOp::Start,
            <H::Board as Board>::start_workload,
        );
        for (index, result) in results {
            match result {
                Ok(()) => {
                    self.report.started.push(index);
                }
                Err(e) => {
                    self.report.board_failures += 1;
                    self.report.start_failures.push(e);
                }
            }
        }
        let started: HashSet<usize> = self.report.started.iter().copied().collect();
        self.running = (0..self.boards.len())
            .filter(|&pos| started.contains(&self.boards[pos].descriptor().index))
            .collect();

        if self.running.is_empty() {
            return self.fail(BurninError::NoBoardsStarted);
        }
        if self.over_budget() {
            let err = self.budget_error();
            return self.fail(err);
        }
        self.session.advance(SessionState::Running);

        prompt.listen(stop.clone());
        let reason = self.live(dashboard, stop);
        let reason = match reason {
            Ok(reason) => reason,
            Err(e) => return self.fail(e.into()),
        };
        self.report.stop_reason = Some(reason);
        info!("Burn-in {reason}");

        match reason {
            StopReason::FailureBudget => {
                let err = self.budget_error();
                self.fail(err)
            }
            StopReason::Interrupted => {
                self.session.abort();
                Ok(())
            }
            StopReason::Operator => {
                self.session.advance(SessionState::Stopping);
                Ok(())
            }
        }
    }

    fn live<D: Dashboard>(
        &mut self,
        dashboard: &mut D,
        stop: &StopSignal,
    ) -> std::io::Result<StopReason> {
        let boards = &self.boards;
        let running = &self.running;
        let report = &mut self.report;
        let limit = self.failure_limit;
        let mut hidden = HashSet::new();

        let mut sample = || {
            let mut samples = Vec::with_capacity(running.len());
            for &pos in running {
                let board = &boards[pos];
                let index = board.descriptor().index;
                if hidden.contains(&index) {
                    continue;
                }
                match board.sample() {
                    Ok(sample) => samples.push(BoardSample { index, sample }),
                    Err(e) => {
                        error!(board = index, "{e}; removing it from the dashboard");
                        hidden.insert(index);
                        report.board_failures += 1;
                        report.dropped.push(e);
                        if over_budget(report.board_failures, limit) {
                            stop.trigger(StopReason::FailureBudget);
                        }
                    }
                }
            }
            samples
        };

        dashboard.render_live(&mut sample, stop)
    }

    /// Stop whatever is running and issue the final reset, at most once.
    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        if !self.armed {
            self.report.state = Some(self.session.state());
            return;
        }
        if self.session.state() != SessionState::Stopping {
            self.session.abort();
        }

        let running = self.running.iter().map(|&pos| &self.boards[pos]);
        let results = fan_out(running, BoardOp::Stop, <H::Board as Board>::stop_workload);
        self.report
            .stop_failures
            .extend(results.into_iter().filter_map(|(_, result)| result.err()));
        self.running.clear();
        // Handles do not survive a reset
        self.boards.clear();

        self.session.advance(SessionState::FinalReset);
        println!("Resetting boards");
        match self.host.reset(self.plan) {
            Ok(outcome) if outcome.is_success() => info!("Final reset complete"),
            Ok(outcome) => {
                for (interface, message) in &outcome.failed {
                    error!(interface, "Final reset failed: {message}");
                }
                for interface in &outcome.vanished {
                    error!(interface, "Board did not come back after the final reset");
                }
            }
            Err(e) => error!("Final reset failed: {e}"),
        }
        self.report.final_reset = true;
        self.session.advance(SessionState::Done);
        self.report.state = Some(self.session.state());
    }

    fn into_report(mut self) -> RunReport {
        self.finish();
        let mut report = std::mem::take(&mut self.report);
        report.aborted = self.session.aborted();
        report.history = self.session.history().to_vec();
        report
    }
}

impl<H: Host> Drop for Run<'_, H> {
    fn drop(&mut self) {
        self.finish();
    }
}

fn over_budget(failures: usize, limit: Option<usize>) -> bool {
    limit.is_some_and(|limit| failures > limit)
}

pub struct Orchestrator<'h, H, D, P> {
    host: &'h H,
    dashboard: D,
    prompt: P,
    plan: ResetPlan,
    failure_limit: Option<usize>,
    stop: StopSignal,
}

impl<'h, H: Host, D: Dashboard, P: OperatorPrompt> Orchestrator<'h, H, D, P> {
    pub fn new(host: &'h H, dashboard: D, prompt: P, config: &BurninConfig) -> Self {
        Self {
            host,
            dashboard,
            prompt,
            plan: config.reset_plan.clone(),
            failure_limit: config.max_board_failures,
            stop: StopSignal::new(),
        }
    }

    /// The signal ending the live loop; hand a clone to interrupt handlers.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn dashboard(&self) -> &D {
        &self.dashboard
    }

    /// Run the whole sequence. The final reset has been issued by the time
    /// this returns, whichever way it returns.
    pub fn run(&mut self) -> Result<RunReport, BurninError> {
        let mut run = Run::new(self.host, &self.plan, self.failure_limit);
        let result = run.execute(&mut self.dashboard, &self.prompt, &self.stop);
        let report = run.into_report();
        result.map(|()| report)
    }
}
