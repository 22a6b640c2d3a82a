use crate::config::Config;
use crate::core::error::Result;
use crate::util::ToolPaths;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Session state shared by every component: configuration, resolved tools,
/// scratch space and template variables.
pub struct Context {
    /// Configuration.
    pub config: Config,

    /// Workspace root directory.
    pub workspace_root: PathBuf,

    /// `target/droid-runner` under the workspace root.
    pub target_dir: PathBuf,

    /// Resolved toolchain paths.
    pub tools: ToolPaths,

    /// Template variables available to command templates.
    pub template_vars: HashMap<String, String>,

    /// Extra emulator flags from `DROID_RUNNER_EMULATOR_ARGS`.
    pub env_extra_args: Vec<String>,

    scratch_dir: PathBuf,
    // Dropping the guard removes the scratch directory.
    _scratch: Option<TempDir>,
}

impl Context {
    /// Create a context and its scratch directory.
    ///
    /// The scratch directory holds exported and re-signed packages, rebuilt
    /// agents, generated SD cards and keystores. It is removed when the
    /// context is dropped unless `retain-artifacts` is set.
    pub fn new(config: Config, workspace_root: PathBuf) -> Result<Self> {
        let target_dir = workspace_root.join("target").join("droid-runner");
        std::fs::create_dir_all(&target_dir)?;

        let scratch = tempfile::Builder::new()
            .prefix("session-")
            .tempdir_in(&target_dir)?;
        let (scratch_dir, guard) = if config.retain_artifacts {
            let path = scratch.keep();
            tracing::info!(path = %path.display(), "retaining session artifacts");
            (path, None)
        } else {
            (scratch.path().to_path_buf(), Some(scratch))
        };

        let tools = ToolPaths::discover(&config.sdk);
        let mut ctx = Self {
            config,
            workspace_root,
            target_dir,
            tools,
            template_vars: HashMap::new(),
            env_extra_args: crate::config::env::get_extra_emulator_args(),
            scratch_dir,
            _scratch: guard,
        };
        ctx.init_template_vars();
        Ok(ctx)
    }

    /// Replace the discovered tools, refreshing `SDK_ROOT`.
    pub fn with_tools(mut self, tools: ToolPaths) -> Self {
        self.tools = tools;
        self.init_template_vars();
        self
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Keystore used when `[signing] keystore` is unset.
    pub fn default_keystore(&self) -> PathBuf {
        self.scratch_dir.join("debug.keystore")
    }

    /// Initialize template variables.
    ///
    /// Layering order:
    /// 1. Config variables (`[variables]`)
    /// 2. Env var variables (`DROID_RUNNER_VAR_*`)
    /// 3. Built-in variables (always win)
    fn init_template_vars(&mut self) {
        self.template_vars = self.config.variables.clone();

        for (key, value) in crate::config::env::collect_env_variables() {
            self.template_vars.insert(key, value);
        }

        self.template_vars.insert(
            "WORKSPACE_ROOT".to_string(),
            self.workspace_root.display().to_string(),
        );
        self.template_vars.insert(
            "WORK_DIR".to_string(),
            self.scratch_dir.display().to_string(),
        );
        if let Some(root) = &self.tools.sdk_root {
            self.template_vars
                .insert("SDK_ROOT".to_string(), root.display().to_string());
        }
    }

    /// Emulator flags appended after `emulator.options`.
    pub fn extra_emulator_args(&self) -> &[String] {
        &self.env_extra_args
    }
}
