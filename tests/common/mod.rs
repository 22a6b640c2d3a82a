#![allow(dead_code)]

use droid_runner::runner::{ProcessCommand, ProcessResult, ScriptedRunner};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use zip::ZipWriter;
use zip::write::FileOptions;

pub const SERIAL: &str = "0123456789ABCDEF";

/// Write an APK-shaped archive with a signature block.
pub fn write_apk(path: &Path) {
    let mut writer = ZipWriter::new(File::create(path).unwrap());
    for (name, body) in [
        ("AndroidManifest.xml", &b"binary manifest"[..]),
        ("classes.dex", &b"dex"[..]),
        ("META-INF/MANIFEST.MF", &b"Manifest-Version: 1.0"[..]),
        ("META-INF/CERT.SF", &b"sig"[..]),
        ("META-INF/CERT.RSA", &b"rsa"[..]),
    ] {
        writer.start_file(name, FileOptions::default()).unwrap();
        writer.write_all(body).unwrap();
    }
    writer.finish().unwrap();
}

/// One attached device plus the host tools, all answered in memory.
///
/// Installing `<stem>-resigned.apk` installs the package mapped from
/// `<stem>`, or `<stem>` itself for rebuilt agents. Packages listed in
/// `running` show up in `ps`.
pub struct FakeDevice {
    packages: HashMap<String, String>,
    running: Vec<String>,
    sticky: HashSet<String>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self {
            packages: HashMap::new(),
            running: Vec::new(),
            sticky: HashSet::new(),
        }
    }

    /// Map archive stem `stem` to `package`.
    pub fn package(mut self, stem: &str, package: &str) -> Self {
        self.packages.insert(stem.to_string(), package.to_string());
        self
    }

    /// Report `package` as a running process.
    pub fn running(mut self, package: &str) -> Self {
        self.running.push(package.to_string());
        self
    }

    /// `pm uninstall` never removes `package`.
    pub fn sticky(mut self, package: &str) -> Self {
        self.sticky.insert(package.to_string());
        self
    }

    pub fn into_runner(self) -> Arc<ScriptedRunner> {
        let installed: Mutex<HashSet<String>> = Mutex::new(self.sticky.clone());
        Arc::new(ScriptedRunner::new(move |cmd: &ProcessCommand| {
            let args: Vec<&str> = cmd.args.iter().map(String::as_str).collect();
            let mut installed = installed.lock().unwrap();
            match args.as_slice() {
                ["devices"] => ProcessResult::success([
                    "List of devices attached".to_string(),
                    format!("{SERIAL}\tdevice"),
                ]),
                ["package", .., "-F", out] => {
                    let mut writer = ZipWriter::new(File::create(out).unwrap());
                    writer.start_file("AndroidManifest.xml", FileOptions::default()).unwrap();
                    writer.write_all(b"compiled manifest").unwrap();
                    writer.finish().unwrap();
                    ProcessResult::success(Vec::<String>::new())
                }
                [.., "install", "-r", apk] => {
                    let stem = Path::new(apk).file_stem().unwrap().to_string_lossy().into_owned();
                    let stem = stem.trim_end_matches("-resigned").to_string();
                    let package = self.packages.get(&stem).cloned().unwrap_or(stem);
                    installed.insert(package);
                    ProcessResult::success(["Performing Push Install", "Success"])
                }
                [.., "pm", "uninstall", package] => {
                    if !self.sticky.contains(*package) {
                        installed.remove(*package);
                    }
                    ProcessResult::success(["Success"])
                }
                [.., "pm", "list", "packages", package] => {
                    let lines: Vec<String> = installed
                        .iter()
                        .filter(|p| p.as_str() == *package)
                        .map(|p| format!("package:{p}"))
                        .collect();
                    ProcessResult::success(lines)
                }
                [.., "ps"] => ProcessResult::success(
                    self.running
                        .iter()
                        .enumerate()
                        .map(|(i, p)| format!("u0_a{} {} {p}", 40 + i, 1000 + i)),
                ),
                _ => ProcessResult::success(Vec::<String>::new()),
            }
        }))
    }
}
