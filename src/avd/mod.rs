//! Virtual device image (AVD) management.
//!
//! Every command is built from the `[commands]` templates, so the exact
//! tool flags stay configurable.

use crate::config::CommandsConfig;
use crate::core::error::Result;
use crate::emulator::ResolvedDeviceConfig;
use crate::runner::{CommandRunner, ProcessCommand};
use crate::target::TargetCatalog;
use crate::util::TemplateProcessor;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An AVD known to exist on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvdHandle {
    pub name: String,
    /// Created by this session rather than supplied by the user; only
    /// generated AVDs are deleted at teardown.
    pub generated: bool,
}

/// Creates, lists and deletes AVDs through the `android` tool.
#[derive(Clone)]
pub struct AvdManager {
    runner: Arc<dyn CommandRunner>,
    android: PathBuf,
    mksdcard: PathBuf,
    commands: CommandsConfig,
    vars: HashMap<String, String>,
}

impl AvdManager {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        android: impl Into<PathBuf>,
        mksdcard: impl Into<PathBuf>,
        commands: CommandsConfig,
    ) -> Self {
        Self {
            runner,
            android: android.into(),
            mksdcard: mksdcard.into(),
            commands,
            vars: HashMap::new(),
        }
    }

    /// Base template variables, overridden per call by AVD-specific ones.
    pub fn with_vars(mut self, vars: HashMap<String, String>) -> Self {
        self.vars = vars;
        self
    }

    fn command(&self, program: &Path, templates: &[String], extra: &[(&str, String)]) -> Result<ProcessCommand> {
        let mut vars = self.vars.clone();
        for (key, value) in extra {
            vars.insert(key.to_string(), value.clone());
        }
        let args = TemplateProcessor::expand_args(templates, &vars)?;
        Ok(ProcessCommand::new(program).args(args))
    }

    /// Parse the tool's target listing into a catalog.
    pub fn list_targets(&self) -> Result<TargetCatalog> {
        let cmd = self.command(&self.android, &self.commands.list_targets, &[])?;
        let result = self.runner.run_checked(&cmd)?;
        let catalog = TargetCatalog::parse(&result.text())?;
        tracing::debug!(targets = catalog.len(), "target catalog loaded");
        Ok(catalog)
    }

    /// Names of the AVDs that exist on disk.
    pub fn list_avds(&self) -> Result<Vec<String>> {
        let cmd = self.command(&self.android, &self.commands.list_avds, &[])?;
        let result = self.runner.run_checked(&cmd)?;
        Ok(parse_avd_names(&result.output))
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.list_avds()?.iter().any(|n| n == name))
    }

    /// Create the AVD described by `config`.
    pub fn create(&self, config: &ResolvedDeviceConfig) -> Result<AvdHandle> {
        let mut extra = vec![
            ("AVD_NAME", config.avd_name.clone()),
            ("TARGET", config.target.clone()),
            ("TAG_ABI", config.tag_abi.to_string()),
        ];
        let mut templates = self.commands.create_avd.clone();
        if let Some(skin) = &config.skin {
            extra.push(("SKIN", skin.clone()));
            templates.extend(self.commands.create_avd_skin.iter().cloned());
        }
        if let Some(sdcard) = &config.sdcard {
            extra.push(("SDCARD", sdcard.display().to_string()));
            templates.extend(self.commands.create_avd_sdcard.iter().cloned());
        }

        let cmd = self.command(&self.android, &templates, &extra)?;
        tracing::info!(avd = %config.avd_name, target = %config.target, tag_abi = %config.tag_abi, "creating AVD");
        self.runner.run_checked(&cmd)?;
        Ok(AvdHandle {
            name: config.avd_name.clone(),
            generated: config.avd_generated,
        })
    }

    /// Delete an AVD. Deleting one that does not exist is only logged.
    pub fn delete(&self, avd: &AvdHandle) -> Result<()> {
        if !self.exists(&avd.name)? {
            tracing::debug!(avd = %avd.name, "AVD already gone");
            return Ok(());
        }
        let cmd = self.command(&self.android, &self.commands.delete_avd, &[("AVD_NAME", avd.name.clone())])?;
        let result = self.runner.run(&cmd)?;
        if result.succeeded() {
            tracing::info!(avd = %avd.name, "AVD deleted");
            Ok(())
        } else if result.contains("no Android Virtual Device named") {
            tracing::debug!(avd = %avd.name, "AVD already gone");
            Ok(())
        } else {
            Err(result.into_error(&cmd))
        }
    }

    /// Create an SD card image with `mksdcard`.
    pub fn create_sdcard(&self, path: &Path, size: &str, label: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            crate::util::ensure_dir_exists(parent)?;
        }
        let cmd = self.command(
            &self.mksdcard,
            &self.commands.create_sdcard,
            &[
                ("SDCARD", path.display().to_string()),
                ("SDCARD_SIZE", size.to_string()),
                ("SDCARD_LABEL", label.to_string()),
            ],
        )?;
        self.runner.run_checked(&cmd)?;
        tracing::info!(path = %path.display(), size, "SD card created");
        Ok(())
    }
}

/// Extract AVD names from `android list avd` output.
pub fn parse_avd_names(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|line| line.trim().strip_prefix("Name:"))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{ProcessResult, ScriptedRunner};
    use crate::target::{Abi, Tag, TagAbiPair};
    use std::time::Duration;

    const AVD_LISTING: &[&str] = &[
        "Available Android Virtual Devices:",
        "    Name: ci-avd",
        "    Path: /home/ci/.android/avd/ci-avd.avd",
        "  Target: Android 4.4.2 (API level 19)",
        " Tag/ABI: default/x86",
        "---------",
        "    Name: other",
    ];

    fn resolved(name: &str) -> ResolvedDeviceConfig {
        ResolvedDeviceConfig {
            target: "android-19".to_string(),
            tag_abi: TagAbiPair::new(Tag::Default, Abi::X86),
            console_port: 5554,
            adb_port: 5555,
            serial: "emulator-5554".to_string(),
            avd_name: name.to_string(),
            avd_generated: true,
            boot_timeout: Duration::from_secs(120),
            options: Vec::new(),
            skin: None,
            sdcard: None,
        }
    }

    fn manager(runner: Arc<ScriptedRunner>) -> AvdManager {
        AvdManager::new(runner, "android", "mksdcard", CommandsConfig::default())
    }

    #[test]
    fn test_parse_avd_names() {
        let lines: Vec<String> = AVD_LISTING.iter().map(|s| s.to_string()).collect();
        assert_eq!(parse_avd_names(&lines), vec!["ci-avd", "other"]);
    }

    #[test]
    fn test_create_with_skin_and_sdcard() {
        let runner = Arc::new(ScriptedRunner::new(|_| ProcessResult::success(["Created AVD"])));
        let mut config = resolved("ci-avd");
        config.skin = Some("WVGA800".to_string());
        config.sdcard = Some(PathBuf::from("/tmp/sd.img"));

        let handle = manager(runner.clone()).create(&config).unwrap();
        assert!(handle.generated);
        assert_eq!(
            runner.command_lines(),
            vec![
                "android create avd --force -n ci-avd -t android-19 --abi default/x86 --skin WVGA800 --sdcard /tmp/sd.img"
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_create_failure_is_execution_error() {
        let runner = Arc::new(ScriptedRunner::new(|_| {
            ProcessResult::failed(1, ["Error: Target id is not valid"])
        }));
        let err = manager(runner).create(&resolved("ci-avd")).unwrap_err();
        assert!(err.is_execution());
        assert!(err.to_string().contains("Target id is not valid"));
    }

    #[test]
    fn test_delete_missing_avd_is_not_an_error() {
        let runner = Arc::new(ScriptedRunner::new(|_| {
            ProcessResult::success(["Available Android Virtual Devices:"])
        }));
        let avd = AvdHandle {
            name: "gone".to_string(),
            generated: true,
        };
        manager(runner.clone()).delete(&avd).unwrap();
        assert_eq!(runner.count_matching("delete avd"), 0);
    }

    #[test]
    fn test_delete_existing_avd() {
        let runner = Arc::new(ScriptedRunner::new(|cmd| {
            if cmd.args.starts_with(&["list".to_string()]) {
                ProcessResult::success(AVD_LISTING.iter().copied())
            } else {
                ProcessResult::success(["AVD 'ci-avd' deleted."])
            }
        }));
        let avd = AvdHandle {
            name: "ci-avd".to_string(),
            generated: true,
        };
        manager(runner.clone()).delete(&avd).unwrap();
        assert_eq!(runner.count_matching("android delete avd -n ci-avd"), 1);
    }

    #[test]
    fn test_create_sdcard_command() {
        let runner = Arc::new(ScriptedRunner::new(|_| ProcessResult::success(Vec::<String>::new())));
        let dir = tempfile::tempdir().unwrap();
        let card = dir.path().join("cards/sd.img");
        manager(runner.clone())
            .create_sdcard(&card, "128M", "droid")
            .unwrap();
        assert_eq!(
            runner.command_lines(),
            vec![format!("mksdcard -l droid 128M {}", card.display())]
        );
    }
}
