//! Locating SDK and JDK tools.

use crate::config::SdkConfig;
use std::path::{Path, PathBuf};

/// Resolved paths of every external tool the runner invokes.
///
/// Each tool is taken from its explicit configuration first, then from the
/// SDK (or `JAVA_HOME` for the signing tools), and finally falls back to the
/// bare tool name so `PATH` lookup happens at spawn time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub sdk_root: Option<PathBuf>,
    pub adb: PathBuf,
    pub emulator: PathBuf,
    pub android: PathBuf,
    pub aapt: PathBuf,
    pub jarsigner: PathBuf,
    pub keytool: PathBuf,
    pub mksdcard: PathBuf,
    android_jar: Option<PathBuf>,
}

impl ToolPaths {
    /// Resolve every tool from configuration and the environment.
    pub fn discover(sdk: &SdkConfig) -> Self {
        let sdk_root = sdk
            .root
            .clone()
            .or_else(|| std::env::var_os("ANDROID_SDK_ROOT").map(PathBuf::from))
            .or_else(|| std::env::var_os("ANDROID_HOME").map(PathBuf::from))
            .filter(|p| !p.as_os_str().is_empty());
        let java_bin = std::env::var_os("JAVA_HOME").map(|home| PathBuf::from(home).join("bin"));

        let root = sdk_root.as_deref();
        let build_tools = root.and_then(|r| build_tools_dir(r, sdk.build_tools.as_deref()));

        Self {
            adb: pick(&sdk.adb, root.map(|r| r.join("platform-tools")), "adb"),
            emulator: pick(&sdk.emulator, root.map(|r| r.join("emulator")), "emulator"),
            android: pick(&sdk.android, root.map(|r| r.join("tools")), "android"),
            aapt: pick(&sdk.aapt, build_tools, "aapt"),
            jarsigner: pick(&sdk.jarsigner, java_bin.clone(), "jarsigner"),
            keytool: pick(&sdk.keytool, java_bin, "keytool"),
            mksdcard: pick(&sdk.mksdcard, root.map(|r| r.join("tools")), "mksdcard"),
            android_jar: sdk.android_jar.clone(),
            sdk_root,
        }
    }

    /// Bare tool names, resolved through `PATH` when spawned.
    pub fn bare() -> Self {
        Self {
            sdk_root: None,
            adb: PathBuf::from("adb"),
            emulator: PathBuf::from("emulator"),
            android: PathBuf::from("android"),
            aapt: PathBuf::from("aapt"),
            jarsigner: PathBuf::from("jarsigner"),
            keytool: PathBuf::from("keytool"),
            mksdcard: PathBuf::from("mksdcard"),
            android_jar: None,
        }
    }

    /// Pin the `android.jar` returned by [`android_jar`](Self::android_jar).
    pub fn with_android_jar(mut self, jar: Option<PathBuf>) -> Self {
        self.android_jar = jar;
        self
    }

    /// `android.jar` for compiling resources.
    ///
    /// Explicit configuration wins; otherwise `platforms/<target>/android.jar`
    /// when `target` is installed, else the highest installed platform.
    pub fn android_jar(&self, target: Option<&str>) -> Option<PathBuf> {
        if let Some(jar) = &self.android_jar {
            return Some(jar.clone());
        }
        let platforms = self.sdk_root.as_ref()?.join("platforms");
        if let Some(target) = target {
            let jar = platforms.join(target).join("android.jar");
            if jar.is_file() {
                return Some(jar);
            }
        }
        let mut installed: Vec<(Vec<u32>, PathBuf)> = std::fs::read_dir(&platforms)
            .ok()?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                let jar = entry.path().join("android.jar");
                jar.is_file().then(|| (version_key(&name), jar))
            })
            .collect();
        installed.sort();
        installed.pop().map(|(_, jar)| jar)
    }

    /// Whether a tool path points at something runnable, either directly or
    /// through `PATH`.
    pub fn is_available(tool: &Path) -> bool {
        if tool.components().count() > 1 {
            tool.is_file()
        } else {
            which::which(tool).is_ok()
        }
    }

    /// `(name, path)` for every tool, for display.
    pub fn entries(&self) -> Vec<(&'static str, &Path)> {
        vec![
            ("adb", self.adb.as_path()),
            ("emulator", self.emulator.as_path()),
            ("android", self.android.as_path()),
            ("aapt", self.aapt.as_path()),
            ("jarsigner", self.jarsigner.as_path()),
            ("keytool", self.keytool.as_path()),
            ("mksdcard", self.mksdcard.as_path()),
        ]
    }
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self::bare()
    }
}

fn pick(explicit: &Option<PathBuf>, dir: Option<PathBuf>, name: &str) -> PathBuf {
    if let Some(path) = explicit {
        return path.clone();
    }
    if let Some(candidate) = dir.map(|d| d.join(name)).filter(|c| c.is_file()) {
        return candidate;
    }
    PathBuf::from(name)
}

/// `build-tools/<version>`, preferring the configured version, else the
/// highest installed one.
fn build_tools_dir(sdk_root: &Path, wanted: Option<&str>) -> Option<PathBuf> {
    let base = sdk_root.join("build-tools");
    if let Some(version) = wanted {
        let dir = base.join(version);
        return dir.is_dir().then_some(dir);
    }
    std::fs::read_dir(&base)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .map(|entry| (version_key(&entry.file_name().to_string_lossy()), entry.path()))
        .max()
        .map(|(_, path)| path)
}

/// Numeric sort key for names like `19.1.0` or `android-21`.
fn version_key(name: &str) -> Vec<u32> {
    name.split(|c: char| !c.is_ascii_digit())
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.parse().ok())
        .collect()
}
