use crate::config::{Config, ConfigLoader};
use crate::core::context::Context;
use crate::core::error::{Error, Result};
use crate::device::{AdbBridge, Device, DeviceMetadata, DeviceRegistry, LogTail};
use crate::emulator::{DEFAULT_QUALIFIER, EmulatorConsole, EmulatorController};
use crate::event::{Event, EventBus};
use crate::instrumentation::{
    AgentBuilder, Deployment, DeploymentDeclaration, DeploymentPlan, HttpStatusProbe,
    InstrumentationOrchestrator, ManifestTemplate, ReadinessProbe,
};
use crate::package::{ApkInfo, ApkSigner, PackageInstaller};
use crate::runner::{CommandRunner, RetryPolicy, SystemRunner};
use crate::util::ToolPaths;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Builder for a [`Session`].
pub struct SessionBuilder {
    config: Option<Config>,
    workspace_root: Option<PathBuf>,
    runner: Option<Arc<dyn CommandRunner>>,
    console: Option<Arc<dyn EmulatorConsole>>,
    probe: Option<Arc<dyn ReadinessProbe>>,
    tools: Option<ToolPaths>,
    events: Option<EventBus>,
    registry: Option<Arc<DeviceRegistry>>,
    qualifier: String,
    poll_interval: Option<Duration>,
}

impl SessionBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: None,
            workspace_root: None,
            runner: None,
            console: None,
            probe: None,
            tools: None,
            events: None,
            registry: None,
            qualifier: DEFAULT_QUALIFIER.to_string(),
            poll_interval: None,
        }
    }

    /// Set the configuration directly.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Load configuration from Cargo.toml metadata.
    pub fn from_cargo_metadata(mut self) -> Result<Self> {
        let (config, workspace_root) = ConfigLoader::new().load()?;
        self.config = Some(config);
        self.workspace_root = Some(workspace_root);
        Ok(self)
    }

    /// Load configuration from a standalone TOML file.
    pub fn from_config_file(mut self, path: impl Into<PathBuf>) -> Result<Self> {
        let (config, workspace_root) = ConfigLoader::new().config_file(path).load()?;
        self.config = Some(config);
        self.workspace_root = Some(workspace_root);
        Ok(self)
    }

    /// Set the workspace root.
    pub fn workspace_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(path.into());
        self
    }

    /// Run toolchain commands through `runner` instead of spawning processes.
    pub fn runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Use a custom emulator console adapter.
    pub fn console(mut self, console: Arc<dyn EmulatorConsole>) -> Self {
        self.console = Some(console);
        self
    }

    /// Use a custom agent readiness probe.
    pub fn probe(mut self, probe: Arc<dyn ReadinessProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Skip tool discovery and use `tools`.
    pub fn tools(mut self, tools: ToolPaths) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Publish on an existing bus.
    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Share a registry with other sessions.
    pub fn registry(mut self, registry: Arc<DeviceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Container qualifier recorded with the session's device.
    pub fn qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = qualifier.into();
        self
    }

    /// Spacing of the emulator offline poll.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Validate the configuration and assemble the session.
    pub fn build(self) -> Result<Session> {
        let config = self.config.ok_or_else(|| Error::config("no configuration provided"))?;
        config.validate()?;

        let workspace_root = self.workspace_root.ok_or_else(|| {
            Error::config("workspace root not set (call from_cargo_metadata or workspace_root)")
        })?;

        let mut ctx = Context::new(config, workspace_root)?;
        if let Some(tools) = self.tools {
            ctx = ctx.with_tools(tools);
        }

        let runner = self
            .runner
            .unwrap_or_else(|| Arc::new(SystemRunner::new()) as Arc<dyn CommandRunner>);
        let registry = self.registry.unwrap_or_default();
        let events = self.events.unwrap_or_default();
        let bridge = AdbBridge::new(runner.clone(), &ctx.tools.adb).with_commands(ctx.config.commands.clone());

        let signer = ApkSigner::new(
            runner.clone(),
            &ctx.tools.jarsigner,
            &ctx.tools.keytool,
            ctx.config.signing.clone(),
            ctx.default_keystore(),
        )
        .with_commands(ctx.config.commands.clone());
        let installer = PackageInstaller::new(bridge.clone(), signer.clone());

        let orchestrator = match &ctx.config.instrumentation.server_apk {
            Some(server_apk) => {
                let probe: Arc<dyn ReadinessProbe> = match self.probe {
                    Some(probe) => probe,
                    None => Arc::new(HttpStatusProbe::new(
                        ctx.config.instrumentation.status_path.clone(),
                    )?),
                };
                Some(build_orchestrator(&ctx, runner.clone(), bridge.clone(), signer, server_apk, probe, &events)?)
            }
            None => None,
        };

        let controller = if ctx.config.emulator.enabled {
            let mut controller = EmulatorController::new(
                ctx.config.emulator.clone(),
                ctx.config.commands.clone(),
                &ctx.tools,
                runner.clone(),
                registry.clone(),
                events.clone(),
            )
            .with_qualifier(&self.qualifier)
            .with_vars(ctx.template_vars.clone())
            .with_extra_args(ctx.extra_emulator_args().to_vec())
            .with_scratch_dir(ctx.scratch_dir());
            if let Some(console) = self.console {
                controller = controller.with_console(console);
            }
            if let Some(interval) = self.poll_interval {
                controller = controller.with_poll_interval(interval);
            }
            Some(controller)
        } else {
            None
        };

        Ok(Session {
            ctx,
            runner,
            registry,
            events,
            bridge,
            qualifier: self.qualifier,
            controller,
            installer,
            orchestrator,
            device: None,
            log_tail: None,
            deployments: Vec::new(),
            driver_sessions: HashMap::new(),
        })
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn build_orchestrator(
    ctx: &Context,
    runner: Arc<dyn CommandRunner>,
    bridge: AdbBridge,
    signer: ApkSigner,
    server_apk: &std::path::Path,
    probe: Arc<dyn ReadinessProbe>,
    events: &EventBus,
) -> Result<InstrumentationOrchestrator> {
    let settings = &ctx.config.instrumentation;
    let template = ManifestTemplate::load(settings.manifest_template.as_deref())?;
    let builder = AgentBuilder::new(runner, &ctx.tools.aapt, ctx.workspace_root.join(server_apk), template)
        .with_android_jar(ctx.tools.android_jar(ctx.config.emulator.target.as_deref()))
        .with_base_package(&settings.base_package)
        .with_server_version(&settings.server_version);
    let installer = PackageInstaller::new(bridge, signer).with_uninstall_policy(RetryPolicy::attempts(
        settings.monkey_attempts,
        settings.monkey_interval(),
    ));
    Ok(InstrumentationOrchestrator::new(
        installer,
        builder,
        probe,
        events.clone(),
        ctx.scratch_dir().join("agents"),
    )
    .with_port(settings.port)
    .with_readiness_policy(RetryPolicy::attempts(
        settings.readiness_attempts,
        settings.readiness_interval(),
    ))
    .with_monkey_policy(RetryPolicy::attempts(
        settings.monkey_attempts,
        settings.monkey_interval(),
    )))
}

/// One test session: a container (emulator or attached device), the
/// deployments installed on it and the instrumentation agent.
///
/// The methods are the host callbacks, in the order a test run calls them:
/// [`start_container`](Self::start_container), [`deploy`](Self::deploy),
/// [`open_driver_session`](Self::open_driver_session) /
/// [`close_driver_session`](Self::close_driver_session),
/// [`undeploy`](Self::undeploy), [`stop_container`](Self::stop_container).
pub struct Session {
    ctx: Context,
    runner: Arc<dyn CommandRunner>,
    registry: Arc<DeviceRegistry>,
    events: EventBus,
    bridge: AdbBridge,
    qualifier: String,
    controller: Option<EmulatorController>,
    installer: PackageInstaller,
    orchestrator: Option<InstrumentationOrchestrator>,
    device: Option<Device>,
    log_tail: Option<LogTail>,
    deployments: Vec<Deployment>,
    driver_sessions: HashMap<String, usize>,
}

impl Session {
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn controller(&self) -> Option<&EmulatorController> {
        self.controller.as_ref()
    }

    /// The device tests run against, once the container is started.
    pub fn device(&self) -> Option<&Device> {
        self.device.as_ref()
    }

    /// Installed deployments, in deployment order.
    pub fn deployments(&self) -> &[Deployment] {
        &self.deployments
    }

    pub fn deployment(&self, name: &str) -> Option<&Deployment> {
        self.deployments.iter().find(|d| d.name == name)
    }

    /// Bring up the emulator, or attach to the single online device when no
    /// emulator can or should be provisioned.
    pub fn start_container(&mut self) -> Result<Device> {
        if let Some(device) = &self.device {
            return Err(Error::lifecycle(format!("container already started on {device}")));
        }

        let listed = self.bridge.devices()?;
        tracing::debug!(devices = listed.len(), "adb bridge initialized");
        self.events.publish(Event::BridgeInitialized);

        let emulator = match self.controller.as_mut() {
            Some(controller) => controller.start()?,
            None => None,
        };
        let device = match emulator {
            Some(device) => device,
            None => {
                let device = self.bridge.single_online_device()?;
                tracing::info!(device = %device, "using attached device");
                self.registry
                    .put(device.clone(), DeviceMetadata::new(&self.qualifier));
                self.events.publish(Event::DeviceReady {
                    serial: device.serial.clone(),
                    qualifier: self.qualifier.clone(),
                });
                device
            }
        };

        if self.ctx.config.logcat.enabled {
            let path = self
                .ctx
                .config
                .logcat
                .output
                .clone()
                .unwrap_or_else(|| self.ctx.scratch_dir().join(format!("logcat-{}.log", device.serial)));
            match LogTail::start(&self.bridge, &device.serial, &self.ctx.config.logcat, &path) {
                Ok(tail) => self.log_tail = Some(tail),
                Err(e) => tracing::warn!(device = %device, error = %e, "device log capture not started"),
            }
        }

        self.device = Some(device.clone());
        Ok(device)
    }

    fn require_device(&self) -> Result<Device> {
        self.device
            .clone()
            .ok_or_else(|| Error::lifecycle("container is not started"))
    }

    /// Install every deployment of `plan` and instrument the chosen one.
    ///
    /// A failing deployment does not stop the others; the first error is
    /// returned once all have been attempted.
    pub fn deploy(&mut self, plan: &DeploymentPlan) -> Result<Vec<Deployment>> {
        let device = self.require_device()?;
        if let Some(controller) = self.controller.as_mut() {
            controller.mark_active()?;
        }
        if plan.instrumented().is_some() && self.orchestrator.is_none() {
            tracing::warn!("instrumentation.server-apk is not set, deployments will not be instrumented");
        }

        let mut deployed = Vec::new();
        let mut first_error = None;
        for declaration in plan.declarations() {
            let instrumented = plan.is_instrumented(&declaration.name);
            match self.deploy_one(&device, declaration, instrumented) {
                Ok(deployment) => deployed.push(deployment),
                Err(e) => {
                    tracing::error!(deployment = %declaration.name, error = %e, "deployment failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(deployed),
        }
    }

    fn deploy_one(&mut self, device: &Device, declaration: &DeploymentDeclaration, instrumented: bool) -> Result<Deployment> {
        if self.deployment(&declaration.name).is_some() {
            return Err(Error::lifecycle(format!("deployment {} is already installed", declaration.name)));
        }
        let archive = self.ctx.workspace_root.join(&declaration.archive);
        if !archive.exists() {
            return Err(Error::FileNotFound(archive));
        }

        let (package, activity) = match (&declaration.package, &declaration.activity) {
            (Some(package), Some(activity)) => (package.clone(), Some(activity.clone())),
            (package, activity) => {
                let info = ApkInfo::read(self.runner.as_ref(), &self.ctx.tools.aapt, &archive)?;
                (
                    package.clone().unwrap_or(info.package),
                    activity.clone().or(info.launchable_activity),
                )
            }
        };

        let work_dir = self.ctx.scratch_dir().join("deployments").join(&declaration.name);
        crate::util::ensure_dir_exists(&work_dir)?;
        let file_name = archive
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(format!("{}.apk", declaration.name)));
        let exported = work_dir.join(file_name);
        crate::util::fs::copy_file(&archive, &exported)?;
        let resigned = self.installer.resign(&exported, &work_dir)?;

        self.installer.install(device, &resigned, &package)?;
        let deployment = Deployment {
            name: declaration.name.clone(),
            archive,
            exported,
            resigned,
            package,
            activity,
            instrumented,
            port: declaration.port,
        };
        self.deployments.push(deployment.clone());
        self.registry.bind_deployment(&device.serial, &deployment.name)?;
        self.events.publish(Event::DeploymentInstalled {
            deployment: deployment.name.clone(),
            package: deployment.package.clone(),
        });

        if instrumented {
            if let Some(orchestrator) = &self.orchestrator {
                orchestrator.perform(device, &deployment)?;
            }
        }
        Ok(deployment)
    }

    /// Record a driver session opened against `deployment`.
    pub fn open_driver_session(&mut self, deployment: &str) -> Result<()> {
        if self.deployment(deployment).is_none() {
            return Err(Error::lifecycle(format!("deployment {deployment} is not installed")));
        }
        *self.driver_sessions.entry(deployment.to_string()).or_default() += 1;
        Ok(())
    }

    /// Record that a driver session on `deployment` was destroyed.
    pub fn close_driver_session(&mut self, deployment: &str) {
        if let Some(open) = self.driver_sessions.get_mut(deployment) {
            *open -= 1;
            if *open == 0 {
                self.driver_sessions.remove(deployment);
            }
        }
    }

    pub fn open_driver_sessions(&self, deployment: &str) -> usize {
        self.driver_sessions.get(deployment).copied().unwrap_or(0)
    }

    /// Capture the container's screen into `path`.
    pub fn screenshot(&self, path: &std::path::Path) -> Result<()> {
        let device = self.require_device()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            crate::util::ensure_dir_exists(parent)?;
        }
        self.bridge.screenshot(&device.serial, path)
    }

    /// Remove the agent, then uninstall the deployment.
    ///
    /// Refused while a driver session on the deployment is open. Cleanup
    /// failures are logged; undeploying an unknown deployment is a no-op.
    pub fn undeploy(&mut self, name: &str) -> Result<()> {
        let open = self.open_driver_sessions(name);
        if open > 0 {
            return Err(Error::lifecycle(format!(
                "deployment {name} still has {open} open driver session(s)"
            )));
        }
        let Some(pos) = self.deployments.iter().position(|d| d.name == name) else {
            tracing::debug!(deployment = name, "nothing to undeploy");
            return Ok(());
        };
        let deployment = self.deployments.remove(pos);

        if let Some(orchestrator) = &self.orchestrator {
            orchestrator.remove(name);
        }
        if let Some(device) = self.registry.by_deployment_name(name).or_else(|| self.device.clone()) {
            if let Err(e) = self.installer.uninstall(&device, &deployment.package) {
                tracing::warn!(deployment = name, package = %deployment.package, error = %e, "failed to uninstall");
            }
        }
        self.registry.unbind_deployment(name);
        self.events.publish(Event::DeploymentUninstalled {
            deployment: deployment.name,
            package: deployment.package,
        });
        Ok(())
    }

    /// Tear the container down: deployments, agent, device log, emulator.
    ///
    /// Driver sessions still open at this point are abandoned with a warning.
    pub fn stop_container(&mut self) -> Result<()> {
        if !self.driver_sessions.is_empty() {
            tracing::warn!(sessions = ?self.driver_sessions, "closing container with open driver sessions");
            self.driver_sessions.clear();
        }
        let names: Vec<String> = self.deployments.iter().rev().map(|d| d.name.clone()).collect();
        for name in names {
            if let Err(e) = self.undeploy(&name) {
                tracing::warn!(deployment = %name, error = %e, "undeploy failed");
            }
        }
        if let Some(orchestrator) = &self.orchestrator {
            orchestrator.remove_all();
        }
        if let Some(mut tail) = self.log_tail.take() {
            tail.stop();
        }

        let device = self.device.take();
        match self.controller.as_mut() {
            Some(controller) if controller.device().is_some() => controller.stop(),
            Some(controller) => {
                if let Some(device) = &device {
                    self.registry.remove(device);
                }
                controller.stop()
            }
            None => {
                if let Some(device) = &device {
                    self.registry.remove(device);
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{ProcessCommand, ProcessResult, ScriptedRunner};

    fn physical_runner() -> Arc<ScriptedRunner> {
        Arc::new(ScriptedRunner::new(|cmd: &ProcessCommand| {
            if cmd.args.last().is_some_and(|a| a == "devices") {
                ProcessResult::success(["List of devices attached", "0123456789ABCDEF\tdevice"])
            } else {
                ProcessResult::success(Vec::<String>::new())
            }
        }))
    }

    fn physical_session(dir: &std::path::Path, runner: Arc<ScriptedRunner>) -> Session {
        let mut config = Config::default();
        config.emulator.enabled = false;
        SessionBuilder::new()
            .with_config(config)
            .workspace_root(dir)
            .tools(ToolPaths::bare())
            .runner(runner)
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_requires_config_and_root() {
        assert!(matches!(SessionBuilder::new().build(), Err(e) if e.is_config()));
        assert!(matches!(
            SessionBuilder::new().with_config(Config::default()).build(),
            Err(e) if e.is_config()
        ));
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.instrumentation.port = 443;
        let err = SessionBuilder::new()
            .with_config(config)
            .workspace_root(dir.path())
            .build()
            .err()
            .unwrap();
        assert!(err.is_config());
    }

    #[test]
    fn test_physical_container_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = physical_session(dir.path(), physical_runner());
        let rx = session.events().subscribe();

        let device = session.start_container().unwrap();
        assert_eq!(device.serial, "0123456789ABCDEF");
        assert!(session.registry().contains(&device));
        assert!(session.start_container().is_err());

        let shot = dir.path().join("shots/home.png");
        session.screenshot(&shot).unwrap();
        assert!(dir.path().join("shots").is_dir());

        session.stop_container().unwrap();
        assert!(session.screenshot(&shot).is_err());
        assert_eq!(session.registry().size(), 0);
        assert!(session.device().is_none());

        let events: Vec<Event> = rx.try_iter().collect();
        assert_eq!(events[0], Event::BridgeInitialized);
        assert!(matches!(&events[1], Event::DeviceReady { serial, .. } if serial == "0123456789ABCDEF"));
    }

    #[test]
    fn test_deploy_requires_started_container() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = physical_session(dir.path(), physical_runner());
        let plan = DeploymentPlan::new(vec![DeploymentDeclaration::new("shop", "shop.apk")]).unwrap();
        assert!(session.deploy(&plan).is_err());
    }

    #[test]
    fn test_driver_session_requires_deployment() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = physical_session(dir.path(), physical_runner());
        assert!(session.open_driver_session("shop").is_err());
        session.close_driver_session("shop");
        assert_eq!(session.open_driver_sessions("shop"), 0);
    }
}
