//! Rebuilds the instrumentation agent APK for one target package.

use super::template::{AgentIdentity, ManifestTemplate};
use crate::core::error::{Error, Result};
use crate::package::apk::{self, MANIFEST_ENTRY};
use crate::runner::{CommandRunner, ProcessCommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Produces agent APKs whose manifest targets a given package.
///
/// Each build gets a package name suffixed with a counter so several agents
/// can coexist on one device.
pub struct AgentBuilder {
    runner: Arc<dyn CommandRunner>,
    aapt: PathBuf,
    android_jar: Option<PathBuf>,
    server_apk: PathBuf,
    template: ManifestTemplate,
    base_package: String,
    server_version: String,
    counter: AtomicU32,
}

impl AgentBuilder {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        aapt: impl Into<PathBuf>,
        server_apk: impl Into<PathBuf>,
        template: ManifestTemplate,
    ) -> Self {
        Self {
            runner,
            aapt: aapt.into(),
            android_jar: None,
            server_apk: server_apk.into(),
            template,
            base_package: "io.droidrunner.agent".to_string(),
            server_version: "0.1.0".to_string(),
            counter: AtomicU32::new(0),
        }
    }

    /// `android.jar` to compile the manifest against.
    pub fn with_android_jar(mut self, jar: Option<PathBuf>) -> Self {
        self.android_jar = jar;
        self
    }

    pub fn with_base_package(mut self, package: impl Into<String>) -> Self {
        self.base_package = package.into();
        self
    }

    pub fn with_server_version(mut self, version: impl Into<String>) -> Self {
        self.server_version = version.into();
        self
    }

    /// Allocate the next agent identity for `target_package`.
    pub fn next_identity(&self, target_package: &str) -> AgentIdentity {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        AgentIdentity::new(
            format!("{}_{n}", self.base_package),
            &self.server_version,
            target_package,
        )
    }

    /// Build an unsigned agent APK for `identity` inside `work_dir`.
    pub fn build(&self, identity: &AgentIdentity, work_dir: &Path) -> Result<PathBuf> {
        if !self.server_apk.exists() {
            return Err(Error::FileNotFound(self.server_apk.clone()));
        }
        let android_jar = self
            .android_jar
            .as_ref()
            .ok_or_else(|| Error::MissingConfig("sdk.android-jar".to_string()))?;

        let dir = work_dir.join(&identity.package);
        crate::util::ensure_dir_exists(&dir)?;

        let working_copy = dir.join("server.apk");
        crate::util::fs::copy_file(&self.server_apk, &working_copy)?;

        let manifest = dir.join(MANIFEST_ENTRY);
        std::fs::write(&manifest, self.template.render(identity)?)?;

        let dummy = dir.join("manifest-only.apk");
        let cmd = ProcessCommand::new(&self.aapt)
            .args(["package", "-f", "-M"])
            .arg(manifest.display().to_string())
            .arg("-I")
            .arg(android_jar.display().to_string())
            .arg("-F")
            .arg(dummy.display().to_string());
        self.runner.run_checked(&cmd)?;

        let binary_manifest = apk::read_entry(&dummy, MANIFEST_ENTRY)?;
        let rebuilt = dir.join(format!("{}.apk", identity.package));
        apk::replace_entry(&working_copy, &rebuilt, MANIFEST_ENTRY, &binary_manifest)?;
        tracing::info!(package = %identity.package, target = %identity.target_package, "agent rebuilt");
        Ok(rebuilt)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::package::apk::tests::write_apk;
    use crate::runner::{ProcessResult, ScriptedRunner};
    use std::fs::File;
    use std::io::Write;
    use zip::ZipWriter;
    use zip::write::FileOptions;

    /// Pretend to be `aapt package`: write a one-entry APK to the `-F` path.
    pub(crate) fn fake_aapt() -> Arc<ScriptedRunner> {
        Arc::new(ScriptedRunner::new(|cmd| {
            if let Some(pos) = cmd.args.iter().position(|a| a == "-F") {
                let mut writer = ZipWriter::new(File::create(&cmd.args[pos + 1]).unwrap());
                writer.start_file(MANIFEST_ENTRY, FileOptions::default()).unwrap();
                writer.write_all(b"compiled manifest").unwrap();
                writer.finish().unwrap();
            }
            ProcessResult::success(Vec::<String>::new())
        }))
    }

    #[test]
    fn test_identities_are_unique() {
        let builder = AgentBuilder::new(fake_aapt(), "aapt", "server.apk", ManifestTemplate::builtin());
        let first = builder.next_identity("com.example.shop");
        let second = builder.next_identity("com.example.shop");
        assert_eq!(first.package, "io.droidrunner.agent_1");
        assert_eq!(second.package, "io.droidrunner.agent_2");
    }

    #[test]
    fn test_build_splices_compiled_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let server = dir.path().join("server.apk");
        write_apk(&server);

        let runner = fake_aapt();
        let builder = AgentBuilder::new(runner.clone(), "aapt", &server, ManifestTemplate::builtin())
            .with_android_jar(Some(PathBuf::from("/sdk/platforms/android-19/android.jar")));
        let identity = builder.next_identity("com.example.shop");
        let rebuilt = builder.build(&identity, &dir.path().join("work")).unwrap();

        assert_eq!(apk::read_entry(&rebuilt, MANIFEST_ENTRY).unwrap(), b"compiled manifest");
        assert_eq!(apk::read_entry(&rebuilt, "classes.dex").unwrap(), b"dex");
        assert!(!apk::entry_names(&rebuilt).unwrap().iter().any(|n| apk::is_signature_entry(n)));
        assert!(runner.command_lines()[0].contains("-I /sdk/platforms/android-19/android.jar"));

        let source = std::fs::read_to_string(rebuilt.parent().unwrap().join(MANIFEST_ENTRY)).unwrap();
        assert!(source.contains("com.example.shop"));
    }

    #[test]
    fn test_build_requires_android_jar() {
        let dir = tempfile::tempdir().unwrap();
        let server = dir.path().join("server.apk");
        write_apk(&server);
        let builder = AgentBuilder::new(fake_aapt(), "aapt", &server, ManifestTemplate::builtin());
        let identity = builder.next_identity("com.example.shop");
        let err = builder.build(&identity, dir.path()).unwrap_err();
        assert!(err.is_config());
    }
}
