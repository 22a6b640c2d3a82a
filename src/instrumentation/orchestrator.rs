//! Installs, activates and removes the instrumentation agent for the
//! instrumented deployment.

use super::agent::AgentBuilder;
use super::deployment::{Deployment, validate_port};
use super::probe::ReadinessProbe;
use super::template::AgentIdentity;
use crate::core::error::{Error, Result};
use crate::device::{Device, PortForwarding};
use crate::event::{Event, EventBus};
use crate::package::PackageInstaller;
use crate::runner::{OutputWatcher, RetryPolicy, poll_until};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// A running agent bound to one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instrumentation {
    pub deployment: String,
    pub device: Device,
    pub identity: AgentIdentity,
    pub agent_apk: PathBuf,
    pub forwarding: PortForwarding,
}

/// Rebuilds, installs and activates the agent, and unwinds it again.
///
/// At most one [`Instrumentation`] is kept per deployment, so a port pair is
/// never forwarded twice.
pub struct InstrumentationOrchestrator {
    installer: PackageInstaller,
    builder: AgentBuilder,
    probe: Arc<dyn ReadinessProbe>,
    events: EventBus,
    work_dir: PathBuf,
    port: u16,
    readiness: RetryPolicy,
    monkey: RetryPolicy,
    active: Mutex<HashMap<String, Instrumentation>>,
}

impl InstrumentationOrchestrator {
    pub fn new(
        installer: PackageInstaller,
        builder: AgentBuilder,
        probe: Arc<dyn ReadinessProbe>,
        events: EventBus,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            installer,
            builder,
            probe,
            events,
            work_dir: work_dir.into(),
            port: 8080,
            readiness: RetryPolicy::attempts(15, Duration::from_secs(1)),
            monkey: RetryPolicy::attempts(5, Duration::from_secs(1)),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Port used by deployments that do not declare their own.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_readiness_policy(mut self, policy: RetryPolicy) -> Self {
        self.readiness = policy;
        self
    }

    pub fn with_monkey_policy(mut self, policy: RetryPolicy) -> Self {
        self.monkey = policy;
        self
    }

    fn active(&self) -> MutexGuard<'_, HashMap<String, Instrumentation>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The agent bound to `deployment`, if one is running.
    pub fn instrumentation(&self, deployment: &str) -> Option<Instrumentation> {
        self.active().get(deployment).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.active().len()
    }

    /// Rebuild, re-sign, install and activate the agent for `deployment`.
    ///
    /// Any failure aborts this deployment only. A readiness timeout removes
    /// the port forwarding before the error is returned.
    pub fn perform(&self, device: &Device, deployment: &Deployment) -> Result<Instrumentation> {
        if !deployment.instrumented {
            return Err(Error::lifecycle(format!(
                "deployment {} is not marked for instrumentation",
                deployment.name
            )));
        }
        let port = deployment.port.unwrap_or(self.port);
        validate_port(port)?;
        {
            let active = self.active();
            if active.contains_key(&deployment.name) {
                return Err(Error::lifecycle(format!(
                    "deployment {} is already instrumented",
                    deployment.name
                )));
            }
            if active.values().any(|i| i.forwarding.local == port) {
                return Err(Error::InvalidConfig {
                    field: "instrumentation.port".to_string(),
                    value: port.to_string(),
                });
            }
        }

        let identity = self.builder.next_identity(&deployment.package);
        tracing::info!(
            deployment = %deployment.name,
            agent = %identity.package,
            target = %deployment.package,
            "preparing instrumentation agent"
        );
        let unsigned = self.builder.build(&identity, &self.work_dir)?;
        let agent_apk = self
            .installer
            .resign(&unsigned, &self.work_dir.join(&identity.package))?;

        if self.installer.is_installed(device, &identity.package)? {
            self.installer.uninstall(device, &identity.package)?;
        }
        self.installer.install(device, &agent_apk, &identity.package)?;

        let forwarding = self.installer.bridge().forward(&device.serial, port, port)?;
        if let Err(e) = self.activate(device, deployment, &identity, port) {
            self.release_forwarding(&forwarding);
            return Err(e);
        }

        let instrumentation = Instrumentation {
            deployment: deployment.name.clone(),
            device: device.clone(),
            identity,
            agent_apk,
            forwarding,
        };
        self.active()
            .insert(deployment.name.clone(), instrumentation.clone());
        self.events.publish(Event::InstrumentationPerformed {
            deployment: deployment.name.clone(),
            agent_package: instrumentation.identity.package.clone(),
            port,
        });
        tracing::info!(deployment = %deployment.name, port, "instrumentation ready");
        Ok(instrumentation)
    }

    fn activate(&self, device: &Device, deployment: &Deployment, identity: &AgentIdentity, port: u16) -> Result<()> {
        let bridge = self.installer.bridge();
        let instrument = bridge.instrument_command(
            &device.serial,
            &identity.component(),
            port,
            deployment.activity.as_deref(),
        )?;
        let result = bridge.runner().run(&instrument)?;
        if !result.succeeded() {
            return Err(result.into_error(&instrument));
        }

        let ps = bridge.process_list_command(&device.serial)?;
        OutputWatcher::contains(&deployment.package).exact().await_command(
            bridge.runner().as_ref(),
            &ps,
            &self.monkey,
            &format!("monkey wait ({})", deployment.package),
        )?;

        let operation = format!("instrumentation readiness (port {port})");
        poll_until(&operation, &self.readiness, None, |_| self.probe.is_ready(port))
    }

    fn release_forwarding(&self, forwarding: &PortForwarding) {
        if let Err(e) = self.installer.bridge().remove_forward(forwarding) {
            tracing::warn!(port = forwarding.local, error = %e, "failed to remove port forwarding");
        }
    }

    /// Uninstall the agent bound to `deployment` and release its port.
    ///
    /// Must run after every driver session on the deployment is closed.
    /// Errors are logged, never returned; removing twice is a no-op.
    pub fn remove(&self, deployment: &str) {
        let Some(instrumentation) = self.active().remove(deployment) else {
            tracing::debug!(deployment, "no instrumentation to remove");
            return;
        };
        let package = &instrumentation.identity.package;
        if let Err(e) = self.installer.uninstall(&instrumentation.device, package) {
            tracing::warn!(deployment, package = %package, error = %e, "failed to uninstall agent");
        }
        self.release_forwarding(&instrumentation.forwarding);
        self.events.publish(Event::InstrumentationRemoved {
            deployment: deployment.to_string(),
            port: instrumentation.forwarding.local,
        });
        tracing::info!(deployment, "instrumentation removed");
    }

    /// Remove every active instrumentation.
    pub fn remove_all(&self) {
        let names: Vec<String> = self.active().keys().cloned().collect();
        for name in names {
            self.remove(&name);
        }
    }
}
