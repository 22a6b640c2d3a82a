//! Keystore management and APK signing through the JDK tools.

use super::apk;
use crate::config::{CommandsConfig, SigningConfig};
use crate::core::error::Result;
use crate::runner::{CommandRunner, ProcessCommand};
use crate::util::TemplateProcessor;
use crate::util::fs::is_readable_file;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Signs APKs with `jarsigner`, creating a debug keystore with `keytool`
/// when none is readable.
#[derive(Clone)]
pub struct ApkSigner {
    runner: Arc<dyn CommandRunner>,
    jarsigner: PathBuf,
    keytool: PathBuf,
    config: SigningConfig,
    keystore: PathBuf,
    commands: CommandsConfig,
}

impl ApkSigner {
    /// `default_keystore` is used when the configuration names none.
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        jarsigner: impl Into<PathBuf>,
        keytool: impl Into<PathBuf>,
        config: SigningConfig,
        default_keystore: impl Into<PathBuf>,
    ) -> Self {
        let keystore = config.keystore.clone().unwrap_or_else(|| default_keystore.into());
        Self {
            runner,
            jarsigner: jarsigner.into(),
            keytool: keytool.into(),
            config,
            keystore,
            commands: CommandsConfig::default(),
        }
    }

    /// Use the `generate-keystore` and `sign` templates from `commands`.
    pub fn with_commands(mut self, commands: CommandsConfig) -> Self {
        self.commands = commands;
        self
    }

    pub fn keystore(&self) -> &Path {
        &self.keystore
    }

    fn vars(&self) -> HashMap<String, String> {
        let c = &self.config;
        [
            ("KEYSTORE", self.keystore.display().to_string()),
            ("ALIAS", c.alias.clone()),
            ("STORE_PASSWORD", c.store_password.clone()),
            ("KEY_PASSWORD", c.key_password.clone()),
            ("KEYALG", c.keyalg.clone()),
            ("VALIDITY", c.validity.to_string()),
            ("DNAME", c.dname.clone()),
            ("SIGALG", c.sigalg.clone()),
            ("DIGESTALG", c.digestalg.clone()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    /// Create the keystore unless a readable one already exists.
    pub fn ensure_keystore(&self) -> Result<()> {
        if is_readable_file(&self.keystore) {
            return Ok(());
        }
        if let Some(parent) = self.keystore.parent() {
            crate::util::ensure_dir_exists(parent)?;
        }
        let args = TemplateProcessor::expand_args(&self.commands.generate_keystore, &self.vars())?;
        let cmd = ProcessCommand::new(&self.keytool).args(args);
        tracing::info!(keystore = %self.keystore.display(), "generating signing keystore");
        self.runner.run_checked(&cmd)?;
        Ok(())
    }

    /// Sign `input` into `output`. `input` is read, never written.
    pub fn sign(&self, input: &Path, output: &Path) -> Result<()> {
        self.ensure_keystore()?;
        let mut vars = self.vars();
        vars.insert("SIGNED".to_string(), output.display().to_string());
        vars.insert("UNSIGNED".to_string(), input.display().to_string());
        let args = TemplateProcessor::expand_args(&self.commands.sign, &vars)?;
        let cmd = ProcessCommand::new(&self.jarsigner).args(args);
        self.runner.run_checked(&cmd)?;
        tracing::debug!(input = %input.display(), output = %output.display(), "signed");
        Ok(())
    }

    /// Produce a freshly signed copy of `apk` inside `work_dir`.
    ///
    /// Existing signatures are stripped into an intermediate archive first,
    /// so the input file is never touched.
    pub fn resign(&self, apk: &Path, work_dir: &Path) -> Result<PathBuf> {
        if !apk.exists() {
            return Err(crate::core::error::Error::FileNotFound(apk.to_path_buf()));
        }
        crate::util::ensure_dir_exists(work_dir)?;
        let stem = apk
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "package".to_string());
        let unsigned = work_dir.join(format!("{stem}-unsigned.apk"));
        let signed = work_dir.join(format!("{stem}-resigned.apk"));

        let dropped = apk::strip_signatures(apk, &unsigned)?;
        tracing::debug!(apk = %apk.display(), dropped, "stripped signature entries");
        self.sign(&unsigned, &signed)?;
        if let Err(e) = crate::util::fs::remove_file_if_exists(&unsigned) {
            tracing::debug!(path = %unsigned.display(), error = %e, "could not remove intermediate archive");
        }
        Ok(signed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::apk::tests::write_apk;
    use crate::runner::{ProcessResult, ScriptedRunner};

    fn signer(runner: Arc<ScriptedRunner>, keystore: &Path) -> ApkSigner {
        ApkSigner::new(runner, "jarsigner", "keytool", SigningConfig::default(), keystore)
    }

    #[test]
    fn test_keystore_generated_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new(|_| ProcessResult::success(Vec::<String>::new())));
        let keystore = dir.path().join("keys/debug.keystore");
        signer(runner.clone(), &keystore).ensure_keystore().unwrap();

        let line = &runner.command_lines()[0];
        assert!(line.starts_with("keytool -genkey -v -keystore"));
        assert!(line.contains("-alias androiddebugkey"));
        assert!(line.contains("-keyalg RSA -validity 10000"));
        assert!(line.ends_with("-dname \"CN=Android Debug,O=Android,C=US\""));
    }

    #[test]
    fn test_existing_keystore_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = dir.path().join("debug.keystore");
        std::fs::write(&keystore, b"keystore").unwrap();
        let runner = Arc::new(ScriptedRunner::new(|_| ProcessResult::success(Vec::<String>::new())));
        signer(runner.clone(), &keystore).ensure_keystore().unwrap();
        assert!(runner.invocations().is_empty());
    }

    #[test]
    fn test_resign_uses_legacy_algorithms_and_leaves_input() {
        let dir = tempfile::tempdir().unwrap();
        let apk = dir.path().join("shop.apk");
        write_apk(&apk);
        let before = std::fs::read(&apk).unwrap();
        let keystore = dir.path().join("debug.keystore");
        std::fs::write(&keystore, b"keystore").unwrap();

        let runner = Arc::new(ScriptedRunner::new(|_| ProcessResult::success(Vec::<String>::new())));
        let work = dir.path().join("work");
        let signed = signer(runner.clone(), &keystore).resign(&apk, &work).unwrap();

        assert_eq!(signed, work.join("shop-resigned.apk"));
        assert_eq!(std::fs::read(&apk).unwrap(), before);
        let line = &runner.command_lines()[0];
        assert!(line.starts_with("jarsigner -sigalg MD5withRSA -digestalg SHA1"));
        assert!(line.ends_with("shop-unsigned.apk androiddebugkey"));
    }

    #[test]
    fn test_sign_template_override() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = dir.path().join("debug.keystore");
        std::fs::write(&keystore, b"keystore").unwrap();
        let mut commands = CommandsConfig::default();
        commands.sign = ["-keystore", "{{KEYSTORE}}", "-signedjar", "{{SIGNED}}", "{{UNSIGNED}}", "{{ALIAS}}"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let runner = Arc::new(ScriptedRunner::new(|_| ProcessResult::success(Vec::<String>::new())));
        signer(runner.clone(), &keystore)
            .with_commands(commands)
            .sign(Path::new("in.apk"), Path::new("out.apk"))
            .unwrap();
        assert_eq!(
            runner.command_lines(),
            vec![format!(
                "jarsigner -keystore {} -signedjar out.apk in.apk androiddebugkey",
                keystore.display()
            )]
        );
    }

    #[test]
    fn test_failed_signing_is_execution_error() {
        let dir = tempfile::tempdir().unwrap();
        let apk = dir.path().join("shop.apk");
        write_apk(&apk);
        let keystore = dir.path().join("debug.keystore");
        std::fs::write(&keystore, b"keystore").unwrap();

        let runner = Arc::new(ScriptedRunner::new(|_| {
            ProcessResult::failed(1, ["jarsigner error: keystore was tampered with"])
        }));
        let err = signer(runner, &keystore).resign(&apk, dir.path()).unwrap_err();
        assert!(err.is_execution());
    }

    #[test]
    fn test_resign_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new(|_| ProcessResult::success(Vec::<String>::new())));
        let err = signer(runner, &dir.path().join("k"))
            .resign(&dir.path().join("nope.apk"), dir.path())
            .unwrap_err();
        assert!(matches!(err, crate::core::error::Error::FileNotFound(_)));
    }
}
