use super::{Config, METADATA_KEY};
use crate::core::error::{Error, Result};
#[cfg(feature = "cargo-metadata")]
use cargo_metadata::MetadataCommand;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Configuration loader that supports multiple sources.
pub struct ConfigLoader {
    /// Path to workspace root.
    workspace_root: Option<PathBuf>,
    /// Path to standalone config file.
    config_file: Option<PathBuf>,
    /// Whether to load from Cargo.toml metadata.
    use_cargo_metadata: bool,
    /// Profile selected by the caller; `DROID_RUNNER_PROFILE` otherwise.
    profile: Option<String>,
}

impl ConfigLoader {
    /// Create a new configuration loader.
    pub fn new() -> Self {
        Self {
            workspace_root: None,
            config_file: None,
            use_cargo_metadata: true,
            profile: None,
        }
    }

    /// Select a profile, taking precedence over `DROID_RUNNER_PROFILE`.
    pub fn profile(mut self, name: impl Into<String>) -> Self {
        self.profile = Some(name.into());
        self
    }

    /// Set the workspace root directory.
    pub fn workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    /// Set a standalone configuration file path.
    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Disable loading from Cargo.toml metadata.
    pub fn no_cargo_metadata(mut self) -> Self {
        self.use_cargo_metadata = false;
        self
    }

    /// Load configuration from all enabled sources.
    ///
    /// Priority (later sources override earlier):
    /// 1. Default values
    /// 2. Cargo.toml metadata (workspace then package)
    /// 3. Standalone TOML file
    /// 4. Profile overlay (`DROID_RUNNER_PROFILE`)
    /// 5. Individual env var overrides (`DROID_RUNNER_*`)
    pub fn load(self) -> Result<(Config, PathBuf)> {
        let mut config = Config::default();
        let workspace_root;
        let mut profiles: HashMap<String, serde_json::Value> = HashMap::new();

        if self.use_cargo_metadata {
            let (root, cargo_config, cargo_profiles) = self.load_cargo_metadata()?;
            workspace_root = root;
            config = Self::merge_configs(config, cargo_config);
            profiles = cargo_profiles;
        } else {
            workspace_root = self
                .workspace_root
                .clone()
                .ok_or_else(|| Error::config("workspace root not specified"))?;
        }

        if let Some(ref config_path) = self.config_file {
            let raw = self.load_toml_file(config_path)?;
            extract_profiles(&raw, &mut profiles);
            let file_config = serde_json::from_value::<Config>(raw)
                .map_err(|e| Error::config(format!("invalid config file {}: {}", config_path.display(), e)))?;
            config = Self::merge_configs(config, file_config);
        }

        if let Some(name) = self.profile.clone().or_else(super::env::get_profile_name) {
            config = apply_profile(config, &profiles, &name)?;
            tracing::debug!(profile = %name, "profile applied");
        }

        super::env::apply_env_overrides(&mut config);
        tracing::debug!(root = %workspace_root.display(), "configuration loaded");

        Ok((config, workspace_root))
    }

    /// Load configuration from Cargo.toml metadata.
    ///
    /// Returns `(workspace_root, config, profiles)`.
    /// Priority: package metadata > workspace metadata > defaults.
    /// Profiles are collected from both workspace and package metadata
    /// (package profiles override workspace profiles with the same name).
    #[cfg(feature = "cargo-metadata")]
    fn load_cargo_metadata(
        &self,
    ) -> Result<(PathBuf, Config, HashMap<String, serde_json::Value>)> {
        let manifest_path = std::env::var("CARGO_MANIFEST_PATH").ok();

        let mut cmd = MetadataCommand::new();
        if let Some(manifest_path) = manifest_path {
            cmd.manifest_path(manifest_path);
        } else if let Some(root) = &self.workspace_root {
            cmd.current_dir(root);
        }

        let metadata = cmd.exec()?;
        let workspace_root = metadata.workspace_root.clone().into_std_path_buf();

        let mut profiles: HashMap<String, serde_json::Value> = HashMap::new();

        let workspace_config = if let Some(ws_value) = metadata.workspace_metadata.get(METADATA_KEY) {
            // Extract profiles before deserializing Config
            extract_profiles(ws_value, &mut profiles);

            Some(
                serde_json::from_value::<Config>(ws_value.clone())
                    .map_err(|e| Error::config(format!("invalid workspace metadata: {}", e)))?,
            )
        } else {
            None
        };

        // Try to find the package metadata
        let pkg_name = std::env::var("CARGO_PKG_NAME").ok();
        let package = if let Some(ref pkg_name) = pkg_name {
            metadata
                .packages
                .iter()
                .find(|p| &p.name == pkg_name)
                .or_else(|| metadata.root_package())
        } else {
            metadata.root_package()
        };

        let package_config = if let Some(package) = package {
            if let Some(metadata_value) = package.metadata.get(METADATA_KEY) {
                // Package profiles override workspace profiles
                extract_profiles(metadata_value, &mut profiles);

                Some(
                    serde_json::from_value::<Config>(metadata_value.clone())
                        .map_err(|e| Error::config(format!("invalid Cargo.toml metadata: {}", e)))?,
                )
            } else {
                None
            }
        } else {
            None
        };

        // Merge: defaults <- workspace <- package
        let mut config = Config::default();
        if let Some(ws_config) = workspace_config {
            config = Self::merge_configs(config, ws_config);
        }
        if let Some(pkg_config) = package_config {
            config = Self::merge_configs(config, pkg_config);
        }

        Ok((workspace_root, config, profiles))
    }

    #[cfg(not(feature = "cargo-metadata"))]
    fn load_cargo_metadata(
        &self,
    ) -> Result<(PathBuf, Config, HashMap<String, serde_json::Value>)> {
        let root = self
            .workspace_root
            .clone()
            .ok_or_else(|| Error::config("workspace root not specified"))?;
        Ok((root, Config::default(), HashMap::new()))
    }

    /// Load a standalone TOML file as a JSON value so profiles can be
    /// extracted before deserializing.
    fn load_toml_file(&self, path: &Path) -> Result<serde_json::Value> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read config file: {}", e)))?;

        let value: toml::Value = toml::from_str(&content)
            .map_err(|e| Error::config(format!("failed to parse TOML config: {}", e)))?;
        Ok(serde_json::to_value(value)?)
    }

    /// Merge two configurations, with `override_config` taking precedence.
    pub(crate) fn merge_configs(mut base: Config, override_cfg: Config) -> Config {
        base.sdk = override_cfg.sdk;
        base.commands = override_cfg.commands;
        base.emulator = override_cfg.emulator;
        base.signing = override_cfg.signing;
        base.instrumentation = override_cfg.instrumentation;
        base.log = override_cfg.log;
        base.logcat = override_cfg.logcat;
        base.retain_artifacts = override_cfg.retain_artifacts;
        base.verbose = override_cfg.verbose;

        // Merge variables (override wins per-key, base keys preserved)
        for (k, v) in override_cfg.variables {
            base.variables.insert(k, v);
        }

        base
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract profile definitions from a metadata JSON value.
///
/// Profiles live at `value["profiles"]` as `{ name: { ...config fields... } }`.
/// Package-level profiles override workspace-level profiles with the same name.
fn extract_profiles(
    value: &serde_json::Value,
    profiles: &mut HashMap<String, serde_json::Value>,
) {
    if let Some(serde_json::Value::Object(map)) = value.get("profiles") {
        for (name, profile_value) in map {
            profiles.insert(name.clone(), profile_value.clone());
        }
    }
}

/// Overlay the named profile onto `config`.
fn apply_profile(config: Config, profiles: &HashMap<String, serde_json::Value>, name: &str) -> Result<Config> {
    let Some(profile) = profiles.get(name) else {
        let mut available: Vec<&str> = profiles.keys().map(String::as_str).collect();
        available.sort_unstable();
        return Err(if available.is_empty() {
            Error::config(format!("profile '{name}' not found (no profiles defined)"))
        } else {
            Error::config(format!(
                "profile '{name}' not found. Available profiles: {}",
                available.join(", ")
            ))
        });
    };
    let mut value = serde_json::to_value(&config)?;
    deep_merge(&mut value, profile);
    serde_json::from_value(value).map_err(|e| Error::config(format!("failed to apply profile '{name}': {e}")))
}

/// Recursively deep-merge `overlay` into `base`.
///
/// - Objects: keys are merged recursively (overlay keys win for conflicts).
/// - Scalars and arrays: overlay replaces base entirely.
pub(crate) fn deep_merge(base: &mut serde_json::Value, overlay: &serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                let entry = base_map
                    .entry(key.clone())
                    .or_insert(serde_json::Value::Null);
                deep_merge(entry, overlay_val);
            }
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}
