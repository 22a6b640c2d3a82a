//! Regex-based parser for the toolchain's target listing.
//!
//! The listing is a sequence of blocks separated by a dashed line. Each block
//! describes one platform or add-on:
//!
//! ```text
//! id: 1 or "android-19"
//!      Name: Android 4.4.2
//!      Type: Platform
//!      API level: 19
//!      Revision: 4
//!      Skins: HVGA, WVGA800 (default)
//!  Tag/ABIs : default/armeabi-v7a, default/x86
//! ```

use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::core::error::{Error, Result};

/// Line separating target blocks.
pub const BLOCK_SEPARATOR: &str = "----------";

/// Device-variant tag of a system image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tag {
    Default,
    GoogleApis,
    GoogleApisPlaystore,
    AndroidWear,
    AndroidTv,
}

impl Tag {
    pub const ALL: [Tag; 5] = [
        Tag::Default,
        Tag::GoogleApis,
        Tag::GoogleApisPlaystore,
        Tag::AndroidWear,
        Tag::AndroidTv,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::Default => "default",
            Tag::GoogleApis => "google_apis",
            Tag::GoogleApisPlaystore => "google_apis_playstore",
            Tag::AndroidWear => "android-wear",
            Tag::AndroidTv => "android-tv",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Tag::ALL
            .into_iter()
            .find(|tag| tag.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidConfig {
                field: "tag".to_string(),
                value: s.to_string(),
            })
    }
}

/// CPU architecture of a system image.
///
/// `NotDefined` renders as the empty string and is what an unset ABI resolves
/// to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Abi {
    X86,
    X86_64,
    ArmeabiV7a,
    Armeabi,
    Arm64V8a,
    Mips,
    Mips64,
    NotDefined,
}

impl Abi {
    pub const ALL: [Abi; 8] = [
        Abi::X86,
        Abi::X86_64,
        Abi::ArmeabiV7a,
        Abi::Armeabi,
        Abi::Arm64V8a,
        Abi::Mips,
        Abi::Mips64,
        Abi::NotDefined,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Abi::X86 => "x86",
            Abi::X86_64 => "x86_64",
            Abi::ArmeabiV7a => "armeabi-v7a",
            Abi::Armeabi => "armeabi",
            Abi::Arm64V8a => "arm64-v8a",
            Abi::Mips => "mips",
            Abi::Mips64 => "mips64",
            Abi::NotDefined => "",
        }
    }
}

impl fmt::Display for Abi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Abi {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Abi::ALL
            .into_iter()
            .find(|abi| abi.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidConfig {
                field: "abi".to_string(),
                value: s.to_string(),
            })
    }
}

/// A (tag, ABI) pair, ordered by tag then ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagAbiPair {
    pub tag: Tag,
    pub abi: Abi,
}

impl TagAbiPair {
    pub fn new(tag: Tag, abi: Abi) -> Self {
        Self { tag, abi }
    }
}

impl fmt::Display for TagAbiPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tag, self.abi)
    }
}

impl FromStr for TagAbiPair {
    type Err = Error;

    /// Parse `tag/abi`. A missing ABI (`default/` or `default`) is
    /// [`Abi::NotDefined`].
    fn from_str(s: &str) -> Result<Self> {
        let (tag, abi) = s.trim().split_once('/').unwrap_or((s.trim(), ""));
        Ok(Self::new(tag.parse()?, abi.parse()?))
    }
}

/// Whether a target is a base platform or a vendor add-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TargetKind {
    Platform,
    AddOn,
}

/// One platform or add-on the toolchain can build a virtual device from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub id: u32,
    pub id_label: String,
    pub api_level: Option<u32>,
    pub name: String,
    pub vendor: Option<String>,
    pub revision: Option<u32>,
    pub description: Option<String>,
    pub kind: TargetKind,
    pub skins: Vec<String>,
    pub tag_abis: BTreeSet<TagAbiPair>,
}

impl Target {
    fn new(id: u32, id_label: String) -> Self {
        Self {
            id,
            id_label,
            api_level: None,
            name: String::new(),
            vendor: None,
            revision: None,
            description: None,
            kind: TargetKind::Platform,
            skins: Vec::new(),
            tag_abis: BTreeSet::new(),
        }
    }

    pub fn is_platform(&self) -> bool {
        self.kind == TargetKind::Platform
    }

    pub fn is_add_on(&self) -> bool {
        self.kind == TargetKind::AddOn
    }

    pub fn supports(&self, pair: &TagAbiPair) -> bool {
        self.tag_abis.contains(pair)
    }

    pub fn has_tag(&self, tag: Tag) -> bool {
        self.tag_abis.iter().any(|p| p.tag == tag)
    }

    pub fn has_abi(&self, abi: Abi) -> bool {
        self.tag_abis.iter().any(|p| p.abi == abi)
    }
}

/// Parses target listings into [`Target`] records.
pub struct TargetParser {
    id: Regex,
    name: Regex,
    kind: Regex,
    vendor: Regex,
    api_level: Regex,
    revision: Regex,
    description: Regex,
    skins: Regex,
    tag_abis: Regex,
    vendor_label: Regex,
}

impl TargetParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            id: Regex::new(r#"^id:\s*(\d+)\s+or\s+"(.+)"\s*$"#)?,
            name: Regex::new(r"^Name:\s*(.+)$")?,
            kind: Regex::new(r"^Type:\s*(.+)$")?,
            vendor: Regex::new(r"^Vendor:\s*(.+)$")?,
            api_level: Regex::new(r"^API level:\s*(\d+)")?,
            revision: Regex::new(r"^Revision:\s*(\d+)")?,
            description: Regex::new(r"^Description:\s*(.+)$")?,
            skins: Regex::new(r"^Skins:\s*(.*)$")?,
            tag_abis: Regex::new(r"^Tag/ABIs\s*:\s*(.*)$")?,
            vendor_label: Regex::new(r"^[^:]+:[^:]+:(\d+)$")?,
        })
    }

    /// Parse a complete listing. The result is sorted by numeric id.
    pub fn parse(&self, listing: &str) -> Vec<Target> {
        let mut targets: Vec<Target> = listing
            .split(BLOCK_SEPARATOR)
            .filter_map(|block| self.parse_block(block))
            .collect();
        targets.sort_by_key(|t| t.id);
        targets
    }

    /// Parse one block; blocks without an `id:` line are skipped.
    fn parse_block(&self, block: &str) -> Option<Target> {
        let mut target: Option<Target> = None;

        for line in block.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(caps) = self.id.captures(line) {
                let id = caps[1].parse().ok()?;
                target = Some(Target::new(id, caps[2].to_string()));
                continue;
            }
            let Some(t) = target.as_mut() else { continue };

            if let Some(caps) = self.name.captures(line) {
                t.name = caps[1].trim().to_string();
            } else if let Some(caps) = self.kind.captures(line) {
                t.kind = if caps[1].trim().eq_ignore_ascii_case("platform") {
                    TargetKind::Platform
                } else {
                    TargetKind::AddOn
                };
            } else if let Some(caps) = self.vendor.captures(line) {
                t.vendor = Some(caps[1].trim().to_string());
            } else if let Some(caps) = self.api_level.captures(line) {
                t.api_level = caps[1].parse().ok();
            } else if let Some(caps) = self.revision.captures(line) {
                t.revision = caps[1].parse().ok();
            } else if let Some(caps) = self.description.captures(line) {
                t.description = Some(caps[1].trim().to_string());
            } else if let Some(caps) = self.skins.captures(line) {
                t.skins = caps[1]
                    .split(',')
                    .map(|s| s.trim().trim_end_matches("(default)").trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            } else if let Some(caps) = self.tag_abis.captures(line) {
                for raw in caps[1].split(',').map(str::trim).filter(|s| !s.is_empty()) {
                    match raw.parse::<TagAbiPair>() {
                        Ok(pair) => {
                            t.tag_abis.insert(pair);
                        }
                        Err(_) => tracing::trace!(target_id = %t.id_label, pair = raw, "skipping unknown tag/abi"),
                    }
                }
            }
        }

        let mut target = target?;
        if target.api_level.is_none() {
            if let Some(caps) = self.vendor_label.captures(&target.id_label) {
                target.api_level = caps[1].parse().ok();
            }
        }
        Some(target)
    }
}

/// The parsed set of available targets, sorted by numeric id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetCatalog {
    targets: Vec<Target>,
}

impl TargetCatalog {
    /// Parse a target listing.
    pub fn parse(listing: &str) -> Result<Self> {
        let parser = TargetParser::new()?;
        Ok(Self::from_targets(parser.parse(listing)))
    }

    /// Build a catalog from already-parsed targets.
    pub fn from_targets(mut targets: Vec<Target>) -> Self {
        targets.sort_by_key(|t| t.id);
        Self { targets }
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Exact lookup by id-label.
    pub fn by_id_label(&self, id_label: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.id_label == id_label)
    }

    /// All targets with the given API level, in id order.
    pub fn by_api_level(&self, level: u32) -> Vec<&Target> {
        self.targets
            .iter()
            .filter(|t| t.api_level == Some(level))
            .collect()
    }

    pub fn with_tag(&self, tag: Tag) -> Vec<&Target> {
        self.targets.iter().filter(|t| t.has_tag(tag)).collect()
    }

    pub fn with_abi(&self, abi: Abi) -> Vec<&Target> {
        self.targets.iter().filter(|t| t.has_abi(abi)).collect()
    }

    /// Highest-id platform.
    pub fn highest_platform(&self) -> Option<&Target> {
        self.targets.iter().rev().find(|t| t.is_platform())
    }

    /// Highest-id add-on.
    pub fn highest_add_on(&self) -> Option<&Target> {
        self.targets.iter().rev().find(|t| t.is_add_on())
    }
}
