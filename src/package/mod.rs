//! Package signing, installation and removal.

pub mod apk;
mod installer;
mod signer;

pub use apk::ApkInfo;
pub use installer::{PackageInstaller, UNINSTALL_ATTEMPTS, UNINSTALL_INTERVAL};
pub use signer::ApkSigner;
