//! Configuration types and loading from `[package.metadata.droid-runner]` in
//! Cargo.toml or a standalone `droid-runner.toml`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::error::{Error, Result};

pub mod env;
mod loader;
pub use loader::ConfigLoader;

/// Metadata key under `[package.metadata]` / `[workspace.metadata]`.
pub const METADATA_KEY: &str = "droid-runner";

/// Complete configuration for droid-runner.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Android SDK location and tool overrides.
    #[serde(default)]
    pub sdk: SdkConfig,

    /// Argument templates for toolchain commands.
    #[serde(default)]
    pub commands: CommandsConfig,

    /// Emulator and virtual device settings.
    #[serde(default)]
    pub emulator: EmulatorConfig,

    /// Package signing settings.
    #[serde(default)]
    pub signing: SigningConfig,

    /// Instrumentation agent settings.
    #[serde(default)]
    pub instrumentation: InstrumentationConfig,

    /// Host logging.
    #[serde(default)]
    pub log: LogConfig,

    /// Device log capture.
    #[serde(default)]
    pub logcat: LogcatConfig,

    /// Extra template variables for command templates.
    #[serde(default)]
    pub variables: HashMap<String, String>,

    /// Keep the session scratch directory after the session ends.
    #[serde(default, rename = "retain-artifacts")]
    pub retain_artifacts: bool,

    /// Enable verbose output.
    #[serde(default)]
    pub verbose: bool,
}

impl Config {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Parse a configuration from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Check values that can be validated without touching a device.
    pub fn validate(&self) -> Result<()> {
        if self.emulator.boot_timeout == 0 {
            return Err(Error::InvalidConfig {
                field: "emulator.boot-timeout".to_string(),
                value: "0".to_string(),
            });
        }
        if let Some(port) = self.emulator.console_port {
            if !(5554..=5682).contains(&port) || port % 2 != 0 {
                return Err(Error::InvalidConfig {
                    field: "emulator.console-port".to_string(),
                    value: port.to_string(),
                });
            }
        }
        crate::instrumentation::validate_port(self.instrumentation.port)?;
        Ok(())
    }
}

/// Android SDK configuration.
///
/// Every tool path is optional; unset tools are looked up under `root` and
/// then on `PATH`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SdkConfig {
    /// SDK root. Falls back to `ANDROID_SDK_ROOT`, then `ANDROID_HOME`.
    pub root: Option<PathBuf>,
    pub adb: Option<PathBuf>,
    pub emulator: Option<PathBuf>,
    pub android: Option<PathBuf>,
    pub aapt: Option<PathBuf>,
    pub jarsigner: Option<PathBuf>,
    pub keytool: Option<PathBuf>,
    pub mksdcard: Option<PathBuf>,

    /// Build-tools version to take `aapt` from. Highest installed otherwise.
    #[serde(rename = "build-tools")]
    pub build_tools: Option<String>,

    /// `android.jar` used when compiling the agent manifest.
    #[serde(rename = "android-jar")]
    pub android_jar: Option<PathBuf>,
}

/// Argument templates for toolchain commands.
///
/// Placeholders use `{{NAME}}` syntax and are filled from the session's
/// template variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    /// Arguments to the `android` tool listing targets.
    #[serde(rename = "list-targets")]
    pub list_targets: Vec<String>,

    /// Arguments to the `android` tool listing AVDs.
    #[serde(rename = "list-avds")]
    pub list_avds: Vec<String>,

    /// Arguments to the `android` tool creating an AVD.
    #[serde(rename = "create-avd")]
    pub create_avd: Vec<String>,

    /// Appended to `create-avd` when a skin is configured.
    #[serde(rename = "create-avd-skin")]
    pub create_avd_skin: Vec<String>,

    /// Appended to `create-avd` when an SD card is configured.
    #[serde(rename = "create-avd-sdcard")]
    pub create_avd_sdcard: Vec<String>,

    /// Arguments to the `android` tool deleting an AVD.
    #[serde(rename = "delete-avd")]
    pub delete_avd: Vec<String>,

    /// Arguments to the `emulator` binary. `emulator.options` are appended.
    #[serde(rename = "start-emulator")]
    pub start_emulator: Vec<String>,

    /// Arguments to `mksdcard`.
    #[serde(rename = "create-sdcard")]
    pub create_sdcard: Vec<String>,

    /// adb arguments after `-s <serial>` installing `{{APK}}`.
    pub install: Vec<String>,

    /// adb arguments listing packages matching `{{PACKAGE}}`.
    #[serde(rename = "list-packages")]
    pub list_packages: Vec<String>,

    /// adb arguments uninstalling `{{PACKAGE}}`.
    pub uninstall: Vec<String>,

    /// adb arguments forwarding `{{LOCAL_PORT}}` to `{{REMOTE_PORT}}`.
    pub forward: Vec<String>,

    /// adb arguments removing the forwarding of `{{LOCAL_PORT}}`.
    #[serde(rename = "remove-forward")]
    pub remove_forward: Vec<String>,

    /// adb arguments listing device processes.
    #[serde(rename = "process-list")]
    pub process_list: Vec<String>,

    /// adb arguments sending key code `{{KEY}}`.
    #[serde(rename = "key-event")]
    pub key_event: Vec<String>,

    /// Key codes sent after boot to dismiss the lock screen.
    #[serde(rename = "unlock-keys")]
    pub unlock_keys: Vec<String>,

    /// adb arguments starting instrumentation.
    pub instrument: Vec<String>,

    /// Appended to `instrument` when the deployment names `{{ACTIVITY}}`.
    #[serde(rename = "instrument-activity")]
    pub instrument_activity: Vec<String>,

    /// Appended last to `instrument`, with `{{PORT}}` and `{{COMPONENT}}`.
    #[serde(rename = "instrument-server")]
    pub instrument_server: Vec<String>,

    /// Arguments to `keytool` generating `{{KEYSTORE}}`.
    #[serde(rename = "generate-keystore")]
    pub generate_keystore: Vec<String>,

    /// Arguments to `jarsigner` signing `{{UNSIGNED}}` into `{{SIGNED}}`.
    pub sign: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            list_targets: strings(&["list", "target"]),
            list_avds: strings(&["list", "avd"]),
            create_avd: strings(&[
                "create",
                "avd",
                "--force",
                "-n",
                "{{AVD_NAME}}",
                "-t",
                "{{TARGET}}",
                "--abi",
                "{{TAG_ABI}}",
            ]),
            create_avd_skin: strings(&["--skin", "{{SKIN}}"]),
            create_avd_sdcard: strings(&["--sdcard", "{{SDCARD}}"]),
            delete_avd: strings(&["delete", "avd", "-n", "{{AVD_NAME}}"]),
            start_emulator: strings(&[
                "-avd",
                "{{AVD_NAME}}",
                "-port",
                "{{CONSOLE_PORT}}",
                "-verbose",
            ]),
            create_sdcard: strings(&["-l", "{{SDCARD_LABEL}}", "{{SDCARD_SIZE}}", "{{SDCARD}}"]),
            install: strings(&["install", "-r", "{{APK}}"]),
            list_packages: strings(&["shell", "pm", "list", "packages", "{{PACKAGE}}"]),
            uninstall: strings(&["shell", "pm", "uninstall", "{{PACKAGE}}"]),
            forward: strings(&["forward", "tcp:{{LOCAL_PORT}}", "tcp:{{REMOTE_PORT}}"]),
            remove_forward: strings(&["forward", "--remove", "tcp:{{LOCAL_PORT}}"]),
            process_list: strings(&["shell", "ps"]),
            key_event: strings(&["shell", "input", "keyevent", "{{KEY}}"]),
            unlock_keys: strings(&["82", "4"]),
            instrument: strings(&["shell", "am", "instrument"]),
            instrument_activity: strings(&["-e", "main_activity", "{{ACTIVITY}}"]),
            instrument_server: strings(&["-e", "server_port", "{{PORT}}", "{{COMPONENT}}"]),
            generate_keystore: strings(&[
                "-genkey",
                "-v",
                "-keystore",
                "{{KEYSTORE}}",
                "-alias",
                "{{ALIAS}}",
                "-storepass",
                "{{STORE_PASSWORD}}",
                "-keypass",
                "{{KEY_PASSWORD}}",
                "-keyalg",
                "{{KEYALG}}",
                "-validity",
                "{{VALIDITY}}",
                "-dname",
                "{{DNAME}}",
            ]),
            sign: strings(&[
                "-sigalg",
                "{{SIGALG}}",
                "-digestalg",
                "{{DIGESTALG}}",
                "-keystore",
                "{{KEYSTORE}}",
                "-storepass",
                "{{STORE_PASSWORD}}",
                "-keypass",
                "{{KEY_PASSWORD}}",
                "-signedjar",
                "{{SIGNED}}",
                "{{UNSIGNED}}",
                "{{ALIAS}}",
            ]),
        }
    }
}

/// Emulator and virtual device configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Create and boot an emulator. When false, a pre-attached device is used.
    pub enabled: bool,

    /// Target id-label (e.g. `android-19`) or API level (e.g. `19`).
    pub target: Option<String>,

    /// ABI used to build the default `default/<abi>` pair.
    pub abi: Option<String>,

    /// Explicit `tag/abi` pair, e.g. `google_apis/x86`.
    #[serde(rename = "tag-abi")]
    pub tag_abi: Option<String>,

    /// AVD to use or create. User-supplied AVDs are never deleted.
    #[serde(rename = "avd-name")]
    pub avd_name: Option<String>,

    /// Generate a unique AVD name when `avd-name` is unset.
    #[serde(rename = "generate-avd-name")]
    pub generate_avd_name: bool,

    /// Console port. Chosen from `adb devices` when unset.
    #[serde(rename = "console-port")]
    pub console_port: Option<u16>,

    /// Adb port. Defaults to console port + 1.
    #[serde(rename = "adb-port")]
    pub adb_port: Option<u16>,

    /// Boot timeout in seconds.
    #[serde(rename = "boot-timeout")]
    pub boot_timeout: u64,

    /// Emulator output marker signalling boot completion (case-insensitive).
    #[serde(rename = "boot-marker")]
    pub boot_marker: String,

    /// Extra emulator flags, whitespace separated.
    pub options: String,

    /// Skin name passed at AVD creation.
    pub skin: Option<String>,

    /// Console kill timeout in seconds.
    #[serde(rename = "kill-timeout")]
    pub kill_timeout: u64,

    /// Offline wait after kill, in seconds.
    #[serde(rename = "shutdown-timeout")]
    pub shutdown_timeout: u64,

    /// SD card settings.
    pub sdcard: SdCardConfig,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            target: None,
            abi: None,
            tag_abi: None,
            avd_name: None,
            generate_avd_name: true,
            console_port: None,
            adb_port: None,
            boot_timeout: 120,
            boot_marker: "boot completed".to_string(),
            options: "-no-window -no-audio".to_string(),
            skin: None,
            kill_timeout: 10,
            shutdown_timeout: 60,
            sdcard: SdCardConfig::default(),
        }
    }
}

impl EmulatorConfig {
    pub fn boot_timeout(&self) -> Duration {
        Duration::from_secs(self.boot_timeout)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_secs(self.kill_timeout)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }

    /// `options` split into individual flags.
    pub fn option_args(&self) -> Vec<String> {
        self.options.split_whitespace().map(str::to_string).collect()
    }
}

/// SD card configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SdCardConfig {
    /// Image path. Generated cards default to the session scratch directory.
    pub path: Option<PathBuf>,
    /// Size in `mksdcard` syntax, e.g. `128M`.
    pub size: String,
    pub label: Option<String>,
    /// Create the image with `mksdcard` before creating the AVD.
    pub generate: bool,
}

impl Default for SdCardConfig {
    fn default() -> Self {
        Self {
            path: None,
            size: "128M".to_string(),
            label: None,
            generate: false,
        }
    }
}

/// Signing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Keystore path. A debug keystore is generated in the session scratch
    /// directory when unset or unreadable.
    pub keystore: Option<PathBuf>,
    #[serde(rename = "store-password")]
    pub store_password: String,
    #[serde(rename = "key-password")]
    pub key_password: String,
    pub alias: String,
    pub sigalg: String,
    pub digestalg: String,
    pub keyalg: String,
    /// Validity of generated keys, in days.
    pub validity: u32,
    /// Distinguished name of generated keys.
    pub dname: String,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            keystore: None,
            store_password: "android".to_string(),
            key_password: "android".to_string(),
            alias: "androiddebugkey".to_string(),
            sigalg: "MD5withRSA".to_string(),
            digestalg: "SHA1".to_string(),
            keyalg: "RSA".to_string(),
            validity: 10000,
            dname: "CN=Android Debug,O=Android,C=US".to_string(),
        }
    }
}

/// Instrumentation agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentationConfig {
    /// Agent template package.
    #[serde(rename = "server-apk")]
    pub server_apk: Option<PathBuf>,

    /// Manifest template. The built-in template is used when unset.
    #[serde(rename = "manifest-template")]
    pub manifest_template: Option<PathBuf>,

    #[serde(rename = "server-version")]
    pub server_version: String,

    /// Base package of the agent; a per-session counter is appended.
    #[serde(rename = "base-package")]
    pub base_package: String,

    /// Default agent port for deployments that do not set one.
    pub port: u16,

    /// Readiness endpoint path on the forwarded port.
    #[serde(rename = "status-path")]
    pub status_path: String,

    #[serde(rename = "readiness-attempts")]
    pub readiness_attempts: u32,

    #[serde(rename = "readiness-interval-ms")]
    pub readiness_interval_ms: u64,

    #[serde(rename = "monkey-attempts")]
    pub monkey_attempts: u32,

    #[serde(rename = "monkey-interval-ms")]
    pub monkey_interval_ms: u64,
}

impl Default for InstrumentationConfig {
    fn default() -> Self {
        Self {
            server_apk: None,
            manifest_template: None,
            server_version: "0.1.0".to_string(),
            base_package: "io.droidrunner.agent".to_string(),
            port: 8080,
            status_path: "/wd/hub/status".to_string(),
            readiness_attempts: 15,
            readiness_interval_ms: 1000,
            monkey_attempts: 5,
            monkey_interval_ms: 1000,
        }
    }
}

impl InstrumentationConfig {
    pub fn readiness_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_interval_ms)
    }

    pub fn monkey_interval(&self) -> Duration {
        Duration::from_millis(self.monkey_interval_ms)
    }
}

/// Host logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive, overridable by `RUST_LOG`.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Device log capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogcatConfig {
    pub enabled: bool,

    /// Filter specs passed to `adb logcat`, e.g. `*:W`.
    #[serde(rename = "filter-specs")]
    pub filter_specs: Vec<String>,

    /// Output format passed as `-v <format>`.
    pub format: String,

    /// Output file. Defaults to `logcat-<serial>.log` in the scratch directory.
    pub output: Option<PathBuf>,
}

impl Default for LogcatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            filter_specs: vec!["*:W".to_string()],
            format: "threadtime".to_string(),
            output: None,
        }
    }
}
