use crate::core::error::{Error, Result};
use std::fmt;

/// Lifecycle state of one emulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmulatorState {
    Unresolved,
    AvdPending,
    AvdReady,
    Launching,
    BootWaiting,
    Booted,
    Unlocking,
    Ready,
    Active,
    StopRequested,
    KillSent,
    OfflineWaiting,
    Offline,
    AvdDeletePending,
    Terminated,
    /// Start-up failed; the emulator never became ready.
    Failed,
}

impl EmulatorState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: EmulatorState) -> bool {
        use EmulatorState::*;
        matches!(
            (self, next),
            (Unresolved, AvdPending)
                | (Unresolved, AvdReady)
                | (Unresolved, Ready)
                | (AvdPending, AvdReady)
                | (AvdReady, Launching)
                | (Launching, BootWaiting)
                | (BootWaiting, Booted)
                | (Booted, Unlocking)
                | (Unlocking, Ready)
                | (Ready, Active)
                | (Ready, StopRequested)
                | (Active, StopRequested)
                | (StopRequested, KillSent)
                | (KillSent, OfflineWaiting)
                | (OfflineWaiting, Offline)
                | (Offline, AvdDeletePending)
                | (AvdDeletePending, Terminated)
                // Attached emulators are not ours to kill.
                | (Ready, Terminated)
                | (Active, Terminated)
                | (Unresolved, Terminated)
                | (AvdPending, Failed)
                | (AvdReady, Failed)
                | (Launching, Failed)
                | (BootWaiting, Failed)
                | (StopRequested, Failed)
                | (KillSent, Failed)
                | (OfflineWaiting, Failed)
                | (Failed, AvdDeletePending)
                | (Failed, Terminated)
        )
    }

    /// Whether the emulator can serve test traffic.
    pub fn is_ready(self) -> bool {
        matches!(self, EmulatorState::Ready | EmulatorState::Active)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, EmulatorState::Terminated)
    }
}

impl fmt::Display for EmulatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Current state plus transition checking.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: EmulatorState,
    history: Vec<EmulatorState>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: EmulatorState::Unresolved,
            history: vec![EmulatorState::Unresolved],
        }
    }

    pub fn state(&self) -> EmulatorState {
        self.state
    }

    /// Every state entered so far, oldest first.
    pub fn history(&self) -> &[EmulatorState] {
        &self.history
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn advance(&mut self, next: EmulatorState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        tracing::trace!(from = %self.state, to = %next, "emulator state");
        self.state = next;
        self.history.push(next);
        Ok(())
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
