//! APK archive helpers: signature stripping, entry replacement and
//! metadata from `aapt dump badging`.

use crate::core::error::{Error, Result};
use crate::runner::{CommandRunner, ProcessCommand};
use regex::Regex;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Name of the binary manifest inside an APK.
pub const MANIFEST_ENTRY: &str = "AndroidManifest.xml";

/// Whether `name` is part of a JAR signature.
pub fn is_signature_entry(name: &str) -> bool {
    let Some(file) = name.strip_prefix("META-INF/") else {
        return false;
    };
    let upper = file.to_ascii_uppercase();
    upper == "MANIFEST.MF"
        || [".SF", ".RSA", ".DSA", ".EC"]
            .iter()
            .any(|ext| upper.ends_with(ext))
}

/// Copy `src` to `dst` without any signature entries. Returns how many
/// entries were dropped.
pub fn strip_signatures(src: &Path, dst: &Path) -> Result<usize> {
    copy_filtered(src, dst, |name| is_signature_entry(name), None)
}

/// Copy `src` to `dst` with `entry` replaced by `contents`. Signature
/// entries are dropped as well, since they no longer match.
pub fn replace_entry(src: &Path, dst: &Path, entry: &str, contents: &[u8]) -> Result<()> {
    copy_filtered(
        src,
        dst,
        |name| name == entry || is_signature_entry(name),
        Some((entry, contents)),
    )?;
    Ok(())
}

fn copy_filtered<F>(src: &Path, dst: &Path, skip: F, append: Option<(&str, &[u8])>) -> Result<usize>
where
    F: Fn(&str) -> bool,
{
    if src == dst {
        return Err(Error::config(format!(
            "refusing to rewrite {} in place",
            src.display()
        )));
    }
    let mut archive = ZipArchive::new(File::open(src)?)?;
    let mut writer = ZipWriter::new(File::create(dst)?);
    let mut dropped = 0;

    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index)?;
        if skip(entry.name()) {
            tracing::trace!(entry = entry.name(), "dropping entry");
            dropped += 1;
            continue;
        }
        writer.raw_copy_file(entry)?;
    }

    if let Some((name, contents)) = append {
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        writer.start_file(name, options)?;
        writer.write_all(contents)?;
    }
    writer.finish()?;
    Ok(dropped)
}

/// Read one entry from an archive.
pub fn read_entry(apk: &Path, name: &str) -> Result<Vec<u8>> {
    let mut archive = ZipArchive::new(File::open(apk)?)?;
    let mut entry = archive.by_name(name)?;
    let mut contents = Vec::new();
    entry.read_to_end(&mut contents)?;
    Ok(contents)
}

/// Names of every entry, in archive order.
pub fn entry_names(apk: &Path) -> Result<Vec<String>> {
    let mut archive = ZipArchive::new(File::open(apk)?)?;
    let mut names = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        names.push(archive.by_index_raw(index)?.name().to_string());
    }
    Ok(names)
}

/// Package metadata reported by `aapt dump badging`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApkInfo {
    pub package: String,
    pub launchable_activity: Option<String>,
    pub version_name: Option<String>,
}

impl ApkInfo {
    /// Parse `aapt dump badging` output.
    pub fn parse_badging(lines: &[String]) -> Result<Self> {
        let package = Regex::new(r"^package: name='([^']+)'")?;
        let version = Regex::new(r"versionName='([^']*)'")?;
        let activity = Regex::new(r"^launchable-activity: name='([^']+)'")?;

        let mut info: Option<ApkInfo> = None;
        let mut launchable = None;
        for line in lines {
            if let Some(caps) = package.captures(line) {
                info = Some(ApkInfo {
                    package: caps[1].to_string(),
                    launchable_activity: None,
                    version_name: version
                        .captures(line)
                        .map(|v| v[1].to_string())
                        .filter(|v| !v.is_empty()),
                });
            } else if let Some(caps) = activity.captures(line) {
                launchable.get_or_insert_with(|| caps[1].to_string());
            }
        }

        let mut info = info.ok_or_else(|| {
            Error::execution("aapt dump badging", Some(0)).with_output(lines.to_vec())
        })?;
        info.launchable_activity = launchable;
        Ok(info)
    }

    /// Run `aapt dump badging` on `apk`.
    pub fn read(runner: &dyn CommandRunner, aapt: &Path, apk: &Path) -> Result<Self> {
        let cmd = ProcessCommand::new(aapt)
            .args(["dump", "badging"])
            .arg(apk.display().to_string());
        let result = runner.run_checked(&cmd)?;
        Self::parse_badging(&result.output)
    }
}
