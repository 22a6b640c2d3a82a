//! Owns one emulator from target resolution to AVD deletion.

use super::console::{EmulatorConsole, TelnetConsole};
use super::state::{EmulatorState, StateMachine};
use crate::avd::{AvdHandle, AvdManager};
use crate::config::{CommandsConfig, EmulatorConfig};
use crate::core::error::{Error, Result};
use crate::device::{AdbBridge, Device, DeviceMetadata, DeviceRegistry, emulator_serial};
use crate::event::{Event, EventBus};
use crate::runner::{
    CancellationToken, CommandRunner, Execution, OutputWatcher, ProcessCommand, RetryPolicy,
    RunningProcess,
};
use crate::target::{TagAbiPair, TargetSelector};
use crate::util::{TemplateProcessor, ToolPaths};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Qualifier used for devices when none is configured.
pub const DEFAULT_QUALIFIER: &str = "android";

/// Fixed AVD name used when name generation is switched off.
const FALLBACK_AVD_NAME: &str = "droid-runner";

/// Everything needed to create and boot one emulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDeviceConfig {
    /// Id-label of the chosen target.
    pub target: String,
    pub tag_abi: TagAbiPair,
    pub console_port: u16,
    pub adb_port: u16,
    pub serial: String,
    pub avd_name: String,
    /// The name was generated by this session, so the AVD is deleted at
    /// teardown.
    pub avd_generated: bool,
    pub boot_timeout: Duration,
    /// Extra emulator flags.
    pub options: Vec<String>,
    pub skin: Option<String>,
    pub sdcard: Option<PathBuf>,
}

/// Outcome of target resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provisioning {
    Emulator(ResolvedDeviceConfig),
    /// No virtual device can be built; tests run against an attached device.
    PhysicalOnly,
}

/// Drives the emulator state machine.
///
/// Lifecycle transitions for one emulator are strictly sequential: every
/// operation takes `&mut self`.
pub struct EmulatorController {
    config: EmulatorConfig,
    commands: CommandsConfig,
    emulator: PathBuf,
    runner: Arc<dyn CommandRunner>,
    avds: AvdManager,
    bridge: AdbBridge,
    console: Arc<dyn EmulatorConsole>,
    registry: Arc<DeviceRegistry>,
    events: EventBus,
    qualifier: String,
    vars: HashMap<String, String>,
    extra_args: Vec<String>,
    scratch_dir: PathBuf,
    poll_interval: Duration,

    machine: StateMachine,
    resolved: Option<ResolvedDeviceConfig>,
    avd: Option<AvdHandle>,
    generated_sdcard: Option<PathBuf>,
    process: Option<Box<dyn RunningProcess>>,
    device: Option<Device>,
    attached: bool,
}

impl EmulatorController {
    pub fn new(
        config: EmulatorConfig,
        commands: CommandsConfig,
        tools: &ToolPaths,
        runner: Arc<dyn CommandRunner>,
        registry: Arc<DeviceRegistry>,
        events: EventBus,
    ) -> Self {
        let avds = AvdManager::new(runner.clone(), &tools.android, &tools.mksdcard, commands.clone());
        let bridge = AdbBridge::new(runner.clone(), &tools.adb).with_commands(commands.clone());
        Self {
            config,
            commands,
            emulator: tools.emulator.clone(),
            runner,
            avds,
            bridge,
            console: Arc::new(TelnetConsole::new()),
            registry,
            events,
            qualifier: DEFAULT_QUALIFIER.to_string(),
            vars: HashMap::new(),
            extra_args: Vec::new(),
            scratch_dir: std::env::temp_dir(),
            poll_interval: Duration::from_secs(1),
            machine: StateMachine::new(),
            resolved: None,
            avd: None,
            generated_sdcard: None,
            process: None,
            device: None,
            attached: false,
        }
    }

    /// Replace the console adapter used to kill the emulator.
    pub fn with_console(mut self, console: Arc<dyn EmulatorConsole>) -> Self {
        self.console = console;
        self
    }

    /// Container qualifier recorded with the registered device.
    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = qualifier.into();
        self
    }

    /// Template variables shared with every command template.
    pub fn with_vars(mut self, vars: HashMap<String, String>) -> Self {
        self.avds = self.avds.with_vars(vars.clone());
        self.vars = vars;
        self
    }

    /// Flags appended to the emulator command line.
    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// Directory for generated SD card images.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    /// Spacing of the offline poll during shutdown.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn state(&self) -> EmulatorState {
        self.machine.state()
    }

    pub fn history(&self) -> &[EmulatorState] {
        self.machine.history()
    }

    pub fn resolved(&self) -> Option<&ResolvedDeviceConfig> {
        self.resolved.as_ref()
    }

    /// The device this controller brought up or attached to.
    pub fn device(&self) -> Option<&Device> {
        self.device.as_ref()
    }

    pub fn bridge(&self) -> &AdbBridge {
        &self.bridge
    }

    pub fn avds(&self) -> &AvdManager {
        &self.avds
    }

    /// Whether the emulator was already running and is not ours to stop.
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Resolve target, tag/ABI, ports and AVD name.
    pub fn resolve(&self) -> Result<Provisioning> {
        let catalog = self.avds.list_targets()?;
        let selection = match TargetSelector::new()
            .with_target(self.config.target.clone())
            .with_tag_abi(self.config.tag_abi.clone())
            .with_abi(self.config.abi.clone())
            .select(&catalog)
        {
            Ok(selection) => selection,
            Err(Error::NoTarget) => {
                tracing::warn!("no Android target installed, falling back to an attached device");
                return Ok(Provisioning::PhysicalOnly);
            }
            Err(e) => return Err(e),
        };
        let Some(tag_abi) = selection.tag_abi else {
            return Ok(Provisioning::PhysicalOnly);
        };

        let console_port = match self.config.console_port {
            Some(port) => port,
            None => self.bridge.free_console_port()?,
        };
        let adb_port = self.config.adb_port.unwrap_or(console_port + 1);

        let (avd_name, avd_generated) = match &self.config.avd_name {
            Some(name) => (name.clone(), false),
            None if self.config.generate_avd_name => {
                (format!("droid-runner-{}", uuid::Uuid::new_v4()), true)
            }
            None => (FALLBACK_AVD_NAME.to_string(), false),
        };

        let sdcard = if self.config.sdcard.generate {
            Some(
                self.config
                    .sdcard
                    .path
                    .clone()
                    .unwrap_or_else(|| self.scratch_dir.join(format!("{avd_name}.img"))),
            )
        } else {
            self.config.sdcard.path.clone()
        };

        let mut options = self.config.option_args();
        options.extend(self.extra_args.iter().cloned());

        Ok(Provisioning::Emulator(ResolvedDeviceConfig {
            target: selection.target.id_label.clone(),
            tag_abi,
            console_port,
            adb_port,
            // adb names emulators after the console port, not the adb port.
            serial: emulator_serial(console_port),
            avd_name,
            avd_generated,
            boot_timeout: self.config.boot_timeout(),
            options,
            skin: self.config.skin.clone(),
            sdcard,
        }))
    }

    /// Bring the emulator up and register its device.
    ///
    /// Returns `None` when no emulator can be provisioned and the caller
    /// should use an attached device instead.
    pub fn start(&mut self) -> Result<Option<Device>> {
        if self.machine.state() != EmulatorState::Unresolved {
            return Err(Error::lifecycle(format!(
                "emulator already started (state {})",
                self.machine.state()
            )));
        }

        if let Some(device) = self.find_running()? {
            tracing::info!(device = %device, "attaching to running emulator");
            self.attached = true;
            self.machine.advance(EmulatorState::Ready)?;
            self.register(device.clone());
            return Ok(Some(device));
        }

        let resolved = match self.resolve()? {
            Provisioning::Emulator(resolved) => resolved,
            Provisioning::PhysicalOnly => return Ok(None),
        };
        tracing::info!(
            target = %resolved.target,
            tag_abi = %resolved.tag_abi,
            avd = %resolved.avd_name,
            console_port = resolved.console_port,
            "resolved emulator"
        );
        self.resolved = Some(resolved.clone());

        match self.boot(&resolved) {
            Ok(device) => Ok(Some(device)),
            Err(e) => {
                self.fail();
                Err(e)
            }
        }
    }

    fn find_running(&self) -> Result<Option<Device>> {
        let (Some(avd), Some(port)) = (&self.config.avd_name, self.config.console_port) else {
            return Ok(None);
        };
        Ok(self.bridge.running_emulator(port)?.map(|_| {
            Device::emulator(avd.clone(), port, self.config.adb_port.unwrap_or(port + 1))
        }))
    }

    fn boot(&mut self, resolved: &ResolvedDeviceConfig) -> Result<Device> {
        if !resolved.avd_generated && self.avds.exists(&resolved.avd_name)? {
            tracing::info!(avd = %resolved.avd_name, "using existing AVD");
            self.avd = Some(AvdHandle {
                name: resolved.avd_name.clone(),
                generated: false,
            });
            self.machine.advance(EmulatorState::AvdReady)?;
        } else {
            self.machine.advance(EmulatorState::AvdPending)?;
            self.prepare_sdcard(resolved)?;
            let handle = self.avds.create(resolved)?;
            self.avd = Some(handle);
            self.machine.advance(EmulatorState::AvdReady)?;
        }
        self.events.publish(Event::AvdAvailable {
            name: resolved.avd_name.clone(),
            generated: resolved.avd_generated,
        });

        self.machine.advance(EmulatorState::Launching)?;
        let cmd = self.launch_command(resolved)?;
        tracing::info!(command = %cmd, "launching emulator");
        let mut process = self.runner.spawn(&cmd)?;
        let lines = process.take_lines();
        self.process = Some(process);

        self.machine.advance(EmulatorState::BootWaiting)?;
        let watcher = Arc::new(Mutex::new(OutputWatcher::contains(&self.config.boot_marker).ignore_case()));
        let task_watcher = watcher.clone();
        let boot = Execution::submit(format!("boot wait ({})", resolved.avd_name), move |token: &CancellationToken| {
            let Some(lines) = lines else {
                return Err(Error::lifecycle("emulator output is not available"));
            };
            while !token.is_cancelled() {
                match lines.recv_timeout(Duration::from_millis(100)) {
                    Ok(line) => {
                        tracing::trace!(target: "emulator", "{line}");
                        let mut watcher = task_watcher.lock().unwrap_or_else(|e| e.into_inner());
                        if watcher.on_line(&line) {
                            return Ok(());
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        let watcher = task_watcher.lock().unwrap_or_else(|e| e.into_inner());
                        return Err(Error::lifecycle("emulator exited before it finished booting")
                            .with_output(watcher.captured()));
                    }
                }
            }
            Err(Error::lifecycle("boot wait cancelled"))
        })?;

        if let Err(e) = boot.wait_at_most(resolved.boot_timeout) {
            let captured = watcher.lock().unwrap_or_else(|e| e.into_inner()).captured();
            tracing::error!(avd = %resolved.avd_name, error = %e, "emulator failed to boot");
            return Err(if e.output().is_empty() { e.with_output(captured) } else { e });
        }
        self.machine.advance(EmulatorState::Booted)?;
        tracing::info!(serial = %resolved.serial, "emulator booted");

        self.machine.advance(EmulatorState::Unlocking)?;
        self.unlock(&resolved.serial);

        let mut device = Device::emulator(&resolved.avd_name, resolved.console_port, resolved.adb_port);
        match self.bridge.properties(&resolved.serial) {
            Ok(properties) => device.properties = properties,
            Err(e) => tracing::debug!(serial = %resolved.serial, error = %e, "could not read device properties"),
        }
        self.machine.advance(EmulatorState::Ready)?;
        self.register(device.clone());
        Ok(device)
    }

    fn prepare_sdcard(&mut self, resolved: &ResolvedDeviceConfig) -> Result<()> {
        if !self.config.sdcard.generate {
            return Ok(());
        }
        let Some(path) = &resolved.sdcard else {
            return Ok(());
        };
        let label = self
            .config
            .sdcard
            .label
            .clone()
            .unwrap_or_else(|| resolved.avd_name.clone());
        self.avds.create_sdcard(path, &self.config.sdcard.size, &label)?;
        self.generated_sdcard = Some(path.clone());
        Ok(())
    }

    fn launch_command(&self, resolved: &ResolvedDeviceConfig) -> Result<ProcessCommand> {
        let mut vars = self.vars.clone();
        vars.insert("AVD_NAME".to_string(), resolved.avd_name.clone());
        vars.insert("CONSOLE_PORT".to_string(), resolved.console_port.to_string());
        vars.insert("ADB_PORT".to_string(), resolved.adb_port.to_string());
        let args = TemplateProcessor::expand_args(&self.commands.start_emulator, &vars)?;
        Ok(ProcessCommand::new(&self.emulator)
            .args(args)
            .args(resolved.options.iter().cloned()))
    }

    /// Dismiss the lock screen with the menu and back keys. Best effort.
    fn unlock(&self, serial: &str) {
        for key in &self.bridge.commands().unlock_keys {
            match self.bridge.key_event(serial, key) {
                Ok(result) if result.succeeded() => {}
                Ok(result) => tracing::warn!(serial, key, output = %result.text(), "unlock key event failed"),
                Err(e) => tracing::warn!(serial, key, error = %e, "unlock key event failed"),
            }
        }
    }

    fn register(&mut self, device: Device) {
        self.registry
            .put(device.clone(), DeviceMetadata::new(&self.qualifier));
        self.events.publish(Event::DeviceReady {
            serial: device.serial.clone(),
            qualifier: self.qualifier.clone(),
        });
        self.device = Some(device);
    }

    /// Record that tests are running against the device.
    pub fn mark_active(&mut self) -> Result<()> {
        if self.machine.state() == EmulatorState::Ready {
            self.machine.advance(EmulatorState::Active)?;
        }
        Ok(())
    }

    fn fail(&mut self) {
        if self.machine.state().can_transition_to(EmulatorState::Failed) {
            let _ = self.machine.advance(EmulatorState::Failed);
        }
        self.kill_process();
    }

    fn kill_process(&mut self) {
        if let Some(mut process) = self.process.take() {
            if let Err(e) = process.kill() {
                tracing::warn!(error = %e, "failed to kill emulator process");
            }
        }
    }

    /// Shut the emulator down and remove what this session created.
    ///
    /// A console kill or offline wait that does not complete is fatal, but
    /// AVD and SD card removal are attempted regardless and only logged.
    /// Stopping a terminated controller is a no-op.
    pub fn stop(&mut self) -> Result<()> {
        use EmulatorState::*;
        let outcome = match self.machine.state() {
            Terminated => return Ok(()),
            Unresolved => {
                self.machine.advance(Terminated)?;
                return Ok(());
            }
            Ready | Active if self.attached => {
                self.unregister();
                self.machine.advance(Terminated)?;
                return Ok(());
            }
            Ready | Active => self.shutdown(),
            Failed => Ok(()),
            other => Err(Error::lifecycle(format!("cannot stop emulator while {other}"))),
        };

        if let Err(e) = &outcome {
            tracing::error!(error = %e, "emulator shutdown failed");
            self.fail();
        }
        self.release();
        outcome
    }

    fn shutdown(&mut self) -> Result<()> {
        use EmulatorState::*;
        let Some(resolved) = self.resolved.clone() else {
            return Err(Error::lifecycle("emulator has no resolved configuration"));
        };

        self.machine.advance(StopRequested)?;
        self.console
            .kill(resolved.console_port, self.config.kill_timeout())?;
        self.machine.advance(KillSent)?;

        self.machine.advance(OfflineWaiting)?;
        let policy = RetryPolicy::within(self.config.shutdown_timeout(), self.poll_interval);
        self.bridge.wait_for_offline(&resolved.serial, &policy)?;
        self.machine.advance(Offline)?;

        tracing::info!(serial = %resolved.serial, "emulator shut down");
        self.events.publish(Event::EmulatorShutdown {
            serial: resolved.serial.clone(),
        });
        self.unregister();
        Ok(())
    }

    fn unregister(&mut self) {
        if let Some(device) = self.device.take() {
            self.registry.remove(&device);
        }
    }

    /// Best-effort removal of everything the session created.
    fn release(&mut self) {
        self.kill_process();
        self.unregister();

        if self.machine.state().can_transition_to(EmulatorState::AvdDeletePending) {
            let _ = self.machine.advance(EmulatorState::AvdDeletePending);
        }
        if let Some(avd) = self.avd.take().filter(|avd| avd.generated) {
            match self.avds.delete(&avd) {
                Ok(()) => self.events.publish(Event::AvdDeleted { name: avd.name }),
                Err(e) => tracing::warn!(avd = %avd.name, error = %e, "failed to delete AVD"),
            }
        }
        if let Some(card) = self.generated_sdcard.take() {
            if let Err(e) = crate::util::fs::remove_file_if_exists(&card) {
                tracing::warn!(path = %card.display(), error = %e, "failed to remove SD card");
            }
        }
        if self.machine.state().can_transition_to(EmulatorState::Terminated) {
            let _ = self.machine.advance(EmulatorState::Terminated);
        }
    }
}
