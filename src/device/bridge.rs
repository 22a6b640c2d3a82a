//! The adb bridge: device discovery and device commands.

use super::{Device, emulator_serial};
use crate::config::CommandsConfig;
use crate::core::error::{Error, Result};
use crate::runner::{CommandRunner, ProcessCommand, ProcessResult, RetryPolicy, poll_until};
use crate::util::TemplateProcessor;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// First console port the emulator accepts.
pub const FIRST_CONSOLE_PORT: u16 = 5554;
/// Last console port the emulator accepts.
pub const LAST_CONSOLE_PORT: u16 = 5682;

/// Connection state reported by `adb devices`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceState {
    Online,
    Offline,
    Unauthorized,
    Other(String),
}

impl DeviceState {
    fn parse(state: &str) -> Self {
        match state {
            "device" => DeviceState::Online,
            "offline" => DeviceState::Offline,
            "unauthorized" => DeviceState::Unauthorized,
            other => DeviceState::Other(other.to_string()),
        }
    }
}

/// One line of `adb devices`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceListing {
    pub serial: String,
    pub state: DeviceState,
}

impl DeviceListing {
    pub fn is_online(&self) -> bool {
        self.state == DeviceState::Online
    }

    /// Console port encoded in an emulator serial.
    pub fn console_port(&self) -> Option<u16> {
        self.serial.strip_prefix("emulator-")?.parse().ok()
    }
}

/// A local-to-device TCP forwarding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortForwarding {
    pub serial: String,
    pub local: u16,
    pub remote: u16,
}

/// Issues adb commands through a [`CommandRunner`].
///
/// Package, forwarding, process, key and instrumentation commands are built
/// from the `[commands]` templates.
#[derive(Clone)]
pub struct AdbBridge {
    runner: Arc<dyn CommandRunner>,
    adb: PathBuf,
    commands: CommandsConfig,
}

impl AdbBridge {
    pub fn new(runner: Arc<dyn CommandRunner>, adb: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            adb: adb.into(),
            commands: CommandsConfig::default(),
        }
    }

    pub fn with_commands(mut self, commands: CommandsConfig) -> Self {
        self.commands = commands;
        self
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    pub fn commands(&self) -> &CommandsConfig {
        &self.commands
    }

    /// `adb -s <serial>` followed by the expanded `templates`.
    fn templated(&self, serial: &str, templates: &[String], vars: &[(&str, String)]) -> Result<ProcessCommand> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        let args = TemplateProcessor::expand_args(templates, &vars)?;
        Ok(self.device_command(serial).args(args))
    }

    fn command(&self) -> ProcessCommand {
        ProcessCommand::new(&self.adb)
    }

    fn device_command(&self, serial: &str) -> ProcessCommand {
        self.command().args(["-s", serial])
    }

    /// `adb -s <serial> shell <args...>`, for callers that poll it.
    pub fn shell_command(&self, serial: &str, args: &[&str]) -> ProcessCommand {
        self.device_command(serial).arg("shell").args(args.iter().copied())
    }

    /// Parse `adb devices`.
    pub fn devices(&self) -> Result<Vec<DeviceListing>> {
        let result = self.runner.run_checked(&self.command().arg("devices"))?;
        Ok(parse_devices(&result.output))
    }

    /// Whether `serial` is listed and online.
    pub fn is_online(&self, serial: &str) -> Result<bool> {
        Ok(self
            .devices()?
            .iter()
            .any(|d| d.serial == serial && d.is_online()))
    }

    /// Poll until `serial` is no longer online.
    pub fn wait_for_offline(&self, serial: &str, policy: &RetryPolicy) -> Result<()> {
        let operation = format!("offline wait ({serial})");
        poll_until(&operation, policy, None, |_| Ok(!self.is_online(serial)?))
    }

    /// Lowest even console port in the emulator range not used by a listed
    /// emulator.
    pub fn free_console_port(&self) -> Result<u16> {
        let used: Vec<u16> = self
            .devices()?
            .iter()
            .filter_map(DeviceListing::console_port)
            .collect();
        (FIRST_CONSOLE_PORT..=LAST_CONSOLE_PORT)
            .step_by(2)
            .find(|port| !used.contains(port))
            .ok_or_else(|| Error::lifecycle("no free emulator console port"))
    }

    /// The single online device, for physical-device mode.
    pub fn single_online_device(&self) -> Result<Device> {
        let online: Vec<DeviceListing> = self.devices()?.into_iter().filter(|d| d.is_online()).collect();
        match online.as_slice() {
            [only] => {
                let mut device = Device::physical(&only.serial);
                if let Some(port) = only.console_port() {
                    device.console_port = Some(port);
                    device.adb_port = Some(port + 1);
                }
                Ok(device)
            }
            [] => Err(Error::DeviceNotFound("no online device attached".to_string())),
            many => Err(Error::lifecycle(format!(
                "expected a single attached device, found {}",
                many.len()
            ))),
        }
    }

    /// Run a shell command on the device.
    pub fn shell(&self, serial: &str, args: &[&str]) -> Result<ProcessResult> {
        self.runner.run(&self.shell_command(serial, args))
    }

    /// Device properties from `getprop`.
    pub fn properties(&self, serial: &str) -> Result<BTreeMap<String, String>> {
        let result = self.shell(serial, &["getprop"])?;
        Ok(parse_getprop(&result.output))
    }

    /// Install an APK. The caller decides what the output means.
    pub fn install(&self, serial: &str, apk: &Path) -> Result<ProcessResult> {
        let cmd = self.templated(serial, &self.commands.install, &[("APK", apk.display().to_string())])?;
        self.runner.run(&cmd)
    }

    /// The package listing filtered by `package`. The filter is a substring
    /// match on the device side.
    pub fn list_packages_command(&self, serial: &str, package: &str) -> Result<ProcessCommand> {
        self.templated(serial, &self.commands.list_packages, &[("PACKAGE", package.to_string())])
    }

    /// Whether `package` is installed.
    pub fn is_installed(&self, serial: &str, package: &str) -> Result<bool> {
        let result = self.runner.run(&self.list_packages_command(serial, package)?)?;
        let wanted = format!("package:{package}");
        Ok(result.output.iter().any(|line| line.trim() == wanted))
    }

    /// Issue the uninstall of `package`. Completion is not awaited.
    pub fn uninstall(&self, serial: &str, package: &str) -> Result<ProcessResult> {
        let cmd = self.templated(serial, &self.commands.uninstall, &[("PACKAGE", package.to_string())])?;
        self.runner.run(&cmd)
    }

    pub fn process_list_command(&self, serial: &str) -> Result<ProcessCommand> {
        self.templated(serial, &self.commands.process_list, &[])
    }

    /// Send one key event.
    pub fn key_event(&self, serial: &str, key: &str) -> Result<ProcessResult> {
        let cmd = self.templated(serial, &self.commands.key_event, &[("KEY", key.to_string())])?;
        self.runner.run(&cmd)
    }

    /// The instrumentation start command for `component`, passing the agent
    /// port and, when known, the activity to launch.
    pub fn instrument_command(
        &self,
        serial: &str,
        component: &str,
        port: u16,
        activity: Option<&str>,
    ) -> Result<ProcessCommand> {
        let mut templates = self.commands.instrument.clone();
        let mut vars = vec![("PORT", port.to_string()), ("COMPONENT", component.to_string())];
        if let Some(activity) = activity {
            vars.push(("ACTIVITY", activity.to_string()));
            templates.extend(self.commands.instrument_activity.iter().cloned());
        }
        templates.extend(self.commands.instrument_server.iter().cloned());
        self.templated(serial, &templates, &vars)
    }

    /// Establish a `tcp:local -> tcp:remote` forwarding.
    pub fn forward(&self, serial: &str, local: u16, remote: u16) -> Result<PortForwarding> {
        let cmd = self.templated(
            serial,
            &self.commands.forward,
            &[("LOCAL_PORT", local.to_string()), ("REMOTE_PORT", remote.to_string())],
        )?;
        self.runner.run_checked(&cmd)?;
        tracing::debug!(serial, local, remote, "port forwarded");
        Ok(PortForwarding {
            serial: serial.to_string(),
            local,
            remote,
        })
    }

    /// Remove a forwarding.
    pub fn remove_forward(&self, forwarding: &PortForwarding) -> Result<()> {
        let cmd = self.templated(
            &forwarding.serial,
            &self.commands.remove_forward,
            &[("LOCAL_PORT", forwarding.local.to_string())],
        )?;
        self.runner.run_checked(&cmd)?;
        tracing::debug!(serial = %forwarding.serial, local = forwarding.local, "port forwarding removed");
        Ok(())
    }

    pub fn push(&self, serial: &str, local: &Path, remote: &str) -> Result<()> {
        let cmd = self
            .device_command(serial)
            .arg("push")
            .arg(local.display().to_string())
            .arg(remote);
        self.runner.run_checked(&cmd).map(|_| ())
    }

    pub fn pull(&self, serial: &str, remote: &str, local: &Path) -> Result<()> {
        let cmd = self
            .device_command(serial)
            .arg("pull")
            .arg(remote)
            .arg(local.display().to_string());
        self.runner.run_checked(&cmd).map(|_| ())
    }

    /// Capture the screen into `local` as PNG.
    ///
    /// The capture goes through a temporary file on the device, which is
    /// removed afterwards on a best-effort basis.
    pub fn screenshot(&self, serial: &str, local: &Path) -> Result<()> {
        let remote = format!("/sdcard/droid-runner-{}.png", uuid::Uuid::new_v4().simple());
        let capture = self.shell(serial, &["screencap", "-p", remote.as_str()])?;
        if !capture.succeeded() {
            return Err(capture.into_error(&self.shell_command(serial, &["screencap", "-p", remote.as_str()])));
        }
        let pulled = self.pull(serial, &remote, local);
        if let Err(e) = self.shell(serial, &["rm", "-f", remote.as_str()]) {
            tracing::debug!(serial, remote = %remote, error = %e, "could not remove device-side capture");
        }
        pulled
    }

    /// `adb -s <serial> logcat -v <format> <filter-specs...>`.
    pub fn logcat_command(&self, serial: &str, format: &str, filter_specs: &[String]) -> ProcessCommand {
        self.device_command(serial)
            .args(["logcat", "-v", format])
            .args(filter_specs.iter().cloned())
    }

    /// Serial of the emulator on `console_port` if it is listed online.
    pub fn running_emulator(&self, console_port: u16) -> Result<Option<String>> {
        let serial = emulator_serial(console_port);
        Ok(self.is_online(&serial)?.then_some(serial))
    }
}

/// Parse `adb devices` output, skipping the header and daemon chatter.
pub fn parse_devices(lines: &[String]) -> Vec<DeviceListing> {
    lines
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            let state = parts.next()?;
            Some(DeviceListing {
                serial: serial.to_string(),
                state: DeviceState::parse(state),
            })
        })
        .collect()
}

/// Parse `[key]: [value]` lines from `getprop`.
pub fn parse_getprop(lines: &[String]) -> BTreeMap<String, String> {
    lines
        .iter()
        .filter_map(|line| {
            let (key, value) = line.trim().split_once("]: [")?;
            let key = key.strip_prefix('[')?;
            let value = value.strip_suffix(']')?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}
