//! Environment variable processing for runtime configuration overrides.
//!
//! Env var prefix: `DROID_RUNNER_`
//!
//! - `DROID_RUNNER_PROFILE` selects a configuration profile
//! - `DROID_RUNNER_EMULATOR_ARGS` appends emulator flags (whitespace-split)
//! - `DROID_RUNNER_VAR_<NAME>` sets template variable `<NAME>`
//! - `DROID_RUNNER_SDK_ROOT` overrides the SDK root
//! - `DROID_RUNNER_TARGET`, `DROID_RUNNER_ABI`, `DROID_RUNNER_TAG_ABI` override target selection
//! - `DROID_RUNNER_AVD_NAME` names the AVD to use
//! - `DROID_RUNNER_CONSOLE_PORT` pins the emulator console port
//! - `DROID_RUNNER_BOOT_TIMEOUT` overrides the boot timeout (seconds)
//! - `DROID_RUNNER_EMULATOR` enables/disables emulator provisioning (1/true/yes or 0/false/no)
//! - `DROID_RUNNER_SERVER_APK` overrides the agent template package
//! - `DROID_RUNNER_INSTRUMENTATION_PORT` overrides the default agent port
//! - `DROID_RUNNER_KEYSTORE` overrides the signing keystore
//! - `DROID_RUNNER_LOG_LEVEL` overrides the default log filter
//! - `DROID_RUNNER_LOGCAT` enables/disables device log capture
//! - `DROID_RUNNER_RETAIN_ARTIFACTS` keeps the scratch directory
//! - `DROID_RUNNER_VERBOSE` enables verbose output

use super::Config;
use std::collections::HashMap;
use std::path::PathBuf;

const PREFIX: &str = "DROID_RUNNER_";
const VAR_PREFIX: &str = "DROID_RUNNER_VAR_";

/// Read the active profile name from `DROID_RUNNER_PROFILE`.
pub fn get_profile_name() -> Option<String> {
    env_str("PROFILE")
}

/// Collect template variables from `DROID_RUNNER_VAR_*` env vars.
///
/// The `VAR_` prefix is stripped, so `DROID_RUNNER_VAR_LOCALE=de` produces
/// `("LOCALE", "de")`.
pub fn collect_env_variables() -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for (key, value) in std::env::vars() {
        if let Some(name) = key.strip_prefix(VAR_PREFIX) {
            if !name.is_empty() {
                vars.insert(name.to_string(), value);
            }
        }
    }
    vars
}

/// Parse `DROID_RUNNER_EMULATOR_ARGS` into a list of arguments.
pub fn get_extra_emulator_args() -> Vec<String> {
    env_str("EMULATOR_ARGS")
        .map(|val| val.split_whitespace().map(String::from).collect())
        .unwrap_or_default()
}

/// Apply individual env var overrides to a config.
///
/// Each override is applied only if the env var is set and parses correctly.
/// Invalid values are ignored.
pub fn apply_env_overrides(config: &mut Config) {
    if let Some(val) = env_str("SDK_ROOT") {
        config.sdk.root = Some(PathBuf::from(val));
    }

    if let Some(val) = env_str("TARGET") {
        config.emulator.target = Some(val);
    }

    if let Some(val) = env_str("ABI") {
        config.emulator.abi = Some(val);
    }

    if let Some(val) = env_str("TAG_ABI") {
        config.emulator.tag_abi = Some(val);
    }

    if let Some(val) = env_str("AVD_NAME") {
        config.emulator.avd_name = Some(val);
    }

    if let Some(val) = env_parse::<u16>("CONSOLE_PORT") {
        config.emulator.console_port = Some(val);
    }

    if let Some(val) = env_parse::<u64>("BOOT_TIMEOUT") {
        config.emulator.boot_timeout = val;
    }

    if let Some(val) = env_bool("EMULATOR") {
        config.emulator.enabled = val;
    }

    if let Some(val) = env_str("SERVER_APK") {
        config.instrumentation.server_apk = Some(PathBuf::from(val));
    }

    if let Some(val) = env_parse::<u16>("INSTRUMENTATION_PORT") {
        config.instrumentation.port = val;
    }

    if let Some(val) = env_str("KEYSTORE") {
        config.signing.keystore = Some(PathBuf::from(val));
    }

    if let Some(val) = env_str("LOG_LEVEL") {
        config.log.level = val;
    }

    if let Some(val) = env_bool("LOGCAT") {
        config.logcat.enabled = val;
    }

    if let Some(val) = env_bool("RETAIN_ARTIFACTS") {
        config.retain_artifacts = val;
    }

    if let Some(val) = env_bool("VERBOSE") {
        config.verbose = val;
    }
}

/// Summarize which env var overrides are currently active.
///
/// Returns a list of `(env_var_name, value)` pairs for display in `check`.
pub fn detect_active_overrides() -> Vec<(String, String)> {
    let keys = [
        "SDK_ROOT",
        "TARGET",
        "ABI",
        "TAG_ABI",
        "AVD_NAME",
        "CONSOLE_PORT",
        "BOOT_TIMEOUT",
        "EMULATOR",
        "EMULATOR_ARGS",
        "SERVER_APK",
        "INSTRUMENTATION_PORT",
        "KEYSTORE",
        "LOG_LEVEL",
        "LOGCAT",
        "RETAIN_ARTIFACTS",
        "VERBOSE",
    ];

    keys.iter()
        .filter_map(|key| env_str(key).map(|val| (format!("{PREFIX}{key}"), val)))
        .collect()
}

// --- helpers ---

fn env_str(suffix: &str) -> Option<String> {
    std::env::var(format!("{PREFIX}{suffix}"))
        .ok()
        .filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(suffix: &str) -> Option<T> {
    env_str(suffix).and_then(|s| s.parse().ok())
}

fn env_bool(suffix: &str) -> Option<bool> {
    env_str(suffix).map(|s| matches!(s.to_lowercase().as_str(), "1" | "true" | "yes"))
}
