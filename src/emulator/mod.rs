//! Emulator lifecycle: state machine, console adapter and controller.

mod console;
mod controller;
mod state;

pub use console::{EmulatorConsole, TelnetConsole};
pub use controller::{DEFAULT_QUALIFIER, EmulatorController, Provisioning, ResolvedDeviceConfig};
pub use state::{EmulatorState, StateMachine};
