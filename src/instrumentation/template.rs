use crate::core::error::{Error, Result};
use crate::util::TemplateProcessor;
use std::collections::HashMap;
use std::path::Path;

/// Manifest used when no template file is configured.
pub const BUILTIN_MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<manifest xmlns:android="http://schemas.android.com/apk/res/android"
    package="{{MAIN_PACKAGE}}"
    android:versionCode="1"
    android:versionName="{{SERVER_VERSION}}">

    <uses-sdk android:minSdkVersion="10" />

    <uses-permission android:name="android.permission.INTERNET" />
    <uses-permission android:name="android.permission.WAKE_LOCK" />
    <uses-permission android:name="android.permission.DISABLE_KEYGUARD" />

    <instrumentation
        android:name="{{SERVER_INSTRUMENTATION}}"
        android:targetPackage="{{TARGET_PACKAGE}}" />
    <instrumentation
        android:name="{{LIGHTWEIGHT_INSTRUMENTATION}}"
        android:targetPackage="{{TARGET_PACKAGE}}" />

    <application android:label="droid-runner agent">
        <uses-library android:name="android.test.runner" />
    </application>
</manifest>
"#;

/// Names substituted into the agent manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    /// Agent package, unique per build.
    pub package: String,
    pub server_instrumentation: String,
    pub lightweight_instrumentation: String,
    pub server_version: String,
    pub target_package: String,
}

impl AgentIdentity {
    /// Identity for `package`, instrumenting `target_package`.
    pub fn new(package: impl Into<String>, server_version: impl Into<String>, target_package: impl Into<String>) -> Self {
        let package = package.into();
        Self {
            server_instrumentation: format!("{package}.ServerInstrumentation"),
            lightweight_instrumentation: format!("{package}.LightweightInstrumentation"),
            package,
            server_version: server_version.into(),
            target_package: target_package.into(),
        }
    }

    /// `package/instrumentation-class` as `am instrument` expects it.
    pub fn component(&self) -> String {
        format!("{}/{}", self.package, self.server_instrumentation)
    }

    fn vars(&self) -> HashMap<String, String> {
        HashMap::from([
            ("SERVER_VERSION".to_string(), self.server_version.clone()),
            ("MAIN_PACKAGE".to_string(), self.package.clone()),
            ("TARGET_PACKAGE".to_string(), self.target_package.clone()),
            ("SERVER_INSTRUMENTATION".to_string(), self.server_instrumentation.clone()),
            ("LIGHTWEIGHT_INSTRUMENTATION".to_string(), self.lightweight_instrumentation.clone()),
        ])
    }
}

/// The agent's `AndroidManifest.xml` with placeholders.
#[derive(Debug, Clone)]
pub struct ManifestTemplate {
    content: String,
}

impl ManifestTemplate {
    pub fn builtin() -> Self {
        Self {
            content: BUILTIN_MANIFEST.to_string(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        Ok(Self {
            content: std::fs::read_to_string(path)?,
        })
    }

    /// Load `path` when given, the built-in template otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::builtin()),
        }
    }

    /// Substitute every placeholder. Unknown placeholders are an error.
    pub fn render(&self, identity: &AgentIdentity) -> Result<String> {
        TemplateProcessor::process_strict(&self.content, &identity.vars())
    }
}
