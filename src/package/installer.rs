use super::signer::ApkSigner;
use crate::core::error::{Error, Result};
use crate::device::{AdbBridge, Device};
use crate::runner::{OutputWatcher, RetryPolicy};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Attempts of the post-uninstall package-list poll.
pub const UNINSTALL_ATTEMPTS: u32 = 5;

/// Spacing of the post-uninstall package-list poll.
pub const UNINSTALL_INTERVAL: Duration = Duration::from_secs(1);

/// Re-signs, installs, verifies and removes packages on a device.
#[derive(Clone)]
pub struct PackageInstaller {
    bridge: AdbBridge,
    signer: ApkSigner,
    uninstall_policy: RetryPolicy,
}

impl PackageInstaller {
    pub fn new(bridge: AdbBridge, signer: ApkSigner) -> Self {
        Self {
            bridge,
            signer,
            uninstall_policy: RetryPolicy::attempts(UNINSTALL_ATTEMPTS, UNINSTALL_INTERVAL),
        }
    }

    /// Override how long `uninstall` waits for the package to disappear.
    pub fn with_uninstall_policy(mut self, policy: RetryPolicy) -> Self {
        self.uninstall_policy = policy;
        self
    }

    pub fn bridge(&self) -> &AdbBridge {
        &self.bridge
    }

    pub fn signer(&self) -> &ApkSigner {
        &self.signer
    }

    /// Produce a signed copy of `apk` in `work_dir`.
    pub fn resign(&self, apk: &Path, work_dir: &Path) -> Result<PathBuf> {
        self.signer.resign(apk, work_dir)
    }

    /// Install `apk` and confirm `base_package` is present afterwards.
    ///
    /// A package that is missing after a successful install command is an
    /// execution error: the installer failed silently.
    pub fn install(&self, device: &Device, apk: &Path, base_package: &str) -> Result<()> {
        tracing::info!(device = %device, apk = %apk.display(), package = base_package, "installing");
        let result = self.bridge.install(&device.serial, apk)?;
        if !result.succeeded() || result.output.iter().any(|l| l.trim_start().starts_with("Failure")) {
            return Err(Error::execution(format!("adb install {}", apk.display()), result.exit_code)
                .with_output(result.output));
        }
        if !self.bridge.is_installed(&device.serial, base_package)? {
            return Err(Error::execution(
                format!("verify installation of {base_package}"),
                result.exit_code,
            )
            .with_output(result.output));
        }
        Ok(())
    }

    pub fn is_installed(&self, device: &Device, base_package: &str) -> Result<bool> {
        self.bridge.is_installed(&device.serial, base_package)
    }

    /// Uninstall `base_package` and wait until the package list stops
    /// listing it.
    pub fn uninstall(&self, device: &Device, base_package: &str) -> Result<()> {
        tracing::info!(device = %device, package = base_package, "uninstalling");
        let result = self.bridge.uninstall(&device.serial, base_package)?;
        tracing::debug!(package = base_package, output = %result.text(), "uninstall issued");

        let listing = self.bridge.list_packages_command(&device.serial, base_package)?;
        let mut watcher = OutputWatcher::absent(format!("package:{base_package}")).exact();
        watcher.await_command(
            self.bridge.runner().as_ref(),
            &listing,
            &self.uninstall_policy,
            &format!("monkey wait ({base_package})"),
        )
    }
}
