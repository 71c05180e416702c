// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Run state and the stop signal shared between the dashboard, the Enter
//! listener and the interrupt handler.

use std::fmt;
use std::io::BufRead;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Lifecycle of one burn-in run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Init,
    Enumerated,
    Reset,
    Ready,
    Running,
    Stopping,
    FinalReset,
    Done,
    Aborted,
}

impl SessionState {
    /// Whether `next` may follow `self`.
    ///
    /// Any live state may abort. An aborted run still goes through the final
    /// reset when boards were touched, otherwise it ends in `Aborted`.
    pub fn can_transition(self, next: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, next),
            (Init, Enumerated)
                | (Enumerated, Reset)
                | (Reset, Ready)
                | (Ready, Running)
                | (Running, Stopping)
                | (Stopping, FinalReset)
                | (FinalReset, Done)
                | (Init | Enumerated | Reset | Ready | Running | Stopping, Aborted)
                | (Aborted, FinalReset)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Done | SessionState::Aborted)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Init => "INIT",
            SessionState::Enumerated => "ENUMERATED",
            SessionState::Reset => "RESET",
            SessionState::Ready => "READY",
            SessionState::Running => "RUNNING",
            SessionState::Stopping => "STOPPING",
            SessionState::FinalReset => "FINAL_RESET",
            SessionState::Done => "DONE",
            SessionState::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

/// Tracks the current state and every state visited.
#[derive(Debug, Clone)]
pub struct Session {
    state: SessionState,
    history: Vec<SessionState>,
    aborted: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            state: SessionState::Init,
            history: vec![SessionState::Init],
            aborted: false,
        }
    }
}

impl Session {
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    /// Set once the run has been aborted, even after it moves on to the
    /// final reset.
    pub fn aborted(&self) -> bool {
        self.aborted
    }

    /// Move to `next`. Illegal transitions are logged and ignored.
    pub fn advance(&mut self, next: SessionState) -> bool {
        if !self.state.can_transition(next) {
            tracing::error!("Ignoring illegal state transition {} -> {next}", self.state);
            return false;
        }
        tracing::debug!("{} -> {next}", self.state);
        if next == SessionState::Aborted {
            self.aborted = true;
        }
        self.state = next;
        self.history.push(next);
        true
    }

    /// Abort the run; a no-op once already aborted.
    pub fn abort(&mut self) {
        if self.state != SessionState::Aborted {
            self.advance(SessionState::Aborted);
        }
    }
}

/// Why the live loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The operator pressed Enter.
    Operator,
    /// SIGINT / Ctrl-C.
    Interrupted,
    /// Too many boards failed.
    FailureBudget,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Operator => f.write_str("stopped by operator"),
            StopReason::Interrupted => f.write_str("interrupted"),
            StopReason::FailureBudget => f.write_str("board failure limit reached"),
        }
    }
}

#[derive(Default)]
struct Slot {
    reason: Mutex<Option<StopReason>>,
    changed: Condvar,
}

/// One-shot stop notification. The first trigger wins, the rest are ignored.
#[derive(Clone, Default)]
pub struct StopSignal {
    slot: Arc<Slot>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this call set the reason.
    pub fn trigger(&self, reason: StopReason) -> bool {
        let mut current = self.slot.reason.lock().unwrap_or_else(|e| e.into_inner());
        if current.is_some() {
            return false;
        }
        *current = Some(reason);
        self.slot.changed.notify_all();
        true
    }

    pub fn reason(&self) -> Option<StopReason> {
        *self.slot.reason.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_triggered(&self) -> bool {
        self.reason().is_some()
    }

    /// Block for at most `timeout`, waking early if the signal fires.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<StopReason> {
        let guard = self.slot.reason.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = self
            .slot
            .changed
            .wait_timeout_while(guard, timeout, |reason| reason.is_none())
            .unwrap_or_else(|e| e.into_inner());
        *guard
    }
}

impl fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopSignal")
            .field("reason", &self.reason())
            .finish()
    }
}

/// Something that tells the run the operator wants to stop.
pub trait OperatorPrompt {
    /// Start listening. `signal` is triggered with [`StopReason::Operator`]
    /// once the operator asks to stop; must not block.
    fn listen(&self, signal: StopSignal);
}

/// Waits for Enter on stdin from a detached thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompt;

impl OperatorPrompt for StdinPrompt {
    fn listen(&self, signal: StopSignal) {
        let spawned = std::thread::Builder::new()
            .name("enter-listener".to_string())
            .spawn(move || {
                let mut line = String::new();
                match std::io::stdin().lock().read_line(&mut line) {
                    // EOF means nobody can ever press Enter
                    Ok(0) => tracing::warn!("stdin closed, stop with Ctrl-C"),
                    Ok(_) => {
                        signal.trigger(StopReason::Operator);
                    }
                    Err(e) => tracing::warn!("Failed to read stdin: {e}, stop with Ctrl-C"),
                }
            });
        if let Err(e) = spawned {
            tracing::error!("Could not start the Enter listener: {e}");
        }
    }
}
