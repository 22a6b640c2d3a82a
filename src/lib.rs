//! droid-runner: provisions Android emulators, installs packages and the
//! instrumentation agent, and tears everything down again for automated test
//! runs.
//!
//! The library drives the Android SDK command-line tools (`android`,
//! `emulator`, `adb`, `aapt`) and the JDK signing tools (`keytool`,
//! `jarsigner`). Every invocation goes through a
//! [`CommandRunner`](runner::CommandRunner), so the whole lifecycle can be
//! exercised against a [`ScriptedRunner`](runner::ScriptedRunner) without an
//! SDK.
//!
//! # Quick Start
//!
//! ```no_run
//! use droid_runner::instrumentation::{DeploymentDeclaration, DeploymentPlan};
//!
//! # fn main() -> droid_runner::Result<()> {
//! let mut session = droid_runner::builder().from_cargo_metadata()?.build()?;
//! session.start_container()?;
//!
//! let plan = DeploymentPlan::new(vec![
//!     DeploymentDeclaration::new("shop", "target/shop.apk").instrumented(),
//!     DeploymentDeclaration::new("payments", "target/payments.apk"),
//! ])?;
//! session.deploy(&plan)?;
//!
//! session.open_driver_session("shop")?;
//! // ... drive the application through the agent on the forwarded port ...
//! session.close_driver_session("shop");
//!
//! session.undeploy("shop")?;
//! session.undeploy("payments")?;
//! session.stop_container()
//! # }
//! ```
//!
//! ## Configuration in Cargo.toml
//!
//! ```toml
//! [package.metadata.droid-runner.emulator]
//! target = "android-19"
//! abi = "x86"
//! boot-timeout = 180
//!
//! [package.metadata.droid-runner.instrumentation]
//! server-apk = "vendor/selendroid-server.apk"
//! port = 8080
//!
//! [package.metadata.droid-runner.logcat]
//! enabled = true
//! filter-specs = ["*:W"]
//! ```
//!
//! # Teardown order
//!
//! [`Session`] enforces the order in which resources are released: driver
//! sessions close before the agent is uninstalled, the agent is uninstalled
//! before the emulator is killed, and the emulator is confirmed offline
//! before its generated AVD is deleted. Cleanup failures are logged and never
//! mask the error that caused the teardown.
//!
//! # Events
//!
//! Collaborators subscribe to the session's [`EventBus`](event::EventBus) to
//! react to devices coming up, packages being installed and the agent being
//! performed or removed.

pub mod avd;
pub mod config;
pub mod core;
pub mod device;
pub mod emulator;
pub mod event;
pub mod instrumentation;
pub mod package;
pub mod runner;
pub mod target;
pub mod util;

// Re-export commonly used types
pub use crate::core::{Error, Result, Session, SessionBuilder};
pub use config::Config;
pub use device::{Device, DeviceRegistry};
pub use event::{Event, EventBus};

/// Create a new session builder.
///
/// This is the main entry point for the fluent API.
///
/// # Example
///
/// ```no_run
/// # fn main() -> droid_runner::Result<()> {
/// let mut session = droid_runner::builder()
///     .from_config_file("droid-runner.toml")?
///     .build()?;
/// session.start_container()?;
/// session.stop_container()
/// # }
/// ```
pub fn builder() -> SessionBuilder {
    SessionBuilder::new()
}
