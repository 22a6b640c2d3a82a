//! Deterministic target and tag/ABI selection.

use super::catalog::{Abi, Tag, TagAbiPair, Target, TargetCatalog};
use crate::core::error::{Error, Result};

/// A target together with the tag/ABI pair to build from it.
///
/// `tag_abi` is `None` when the target advertises no pair at all, in which
/// case no virtual device can be created from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub target: Target,
    pub tag_abi: Option<TagAbiPair>,
}

/// Picks a target from a catalog.
#[derive(Debug, Clone, Default)]
pub struct TargetSelector {
    target: Option<String>,
    tag_abi: Option<String>,
    abi: Option<String>,
}

impl TargetSelector {
    /// Create a selector with nothing configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Desired id-label, or API level when numeric.
    pub fn with_target(mut self, target: Option<impl Into<String>>) -> Self {
        self.target = target.map(Into::into).filter(|t: &String| !t.trim().is_empty());
        self
    }

    /// Desired `tag/abi` string.
    pub fn with_tag_abi(mut self, tag_abi: Option<impl Into<String>>) -> Self {
        self.tag_abi = tag_abi.map(Into::into).filter(|t: &String| !t.trim().is_empty());
        self
    }

    /// Desired ABI, used to build the default `default/<abi>` pair.
    pub fn with_abi(mut self, abi: Option<impl Into<String>>) -> Self {
        self.abi = abi.map(Into::into);
        self
    }

    /// Resolve the target and its tag/ABI pair.
    pub fn select(&self, catalog: &TargetCatalog) -> Result<Selection> {
        let target = self.select_target(catalog)?;
        let tag_abi = self.select_tag_abi(target)?;
        Ok(Selection {
            target: target.clone(),
            tag_abi,
        })
    }

    /// Resolve only the target.
    ///
    /// Without configuration this is the highest-id platform, else the
    /// highest-id add-on; an empty catalog is [`Error::NoTarget`].
    pub fn select_target<'a>(&self, catalog: &'a TargetCatalog) -> Result<&'a Target> {
        let Some(wanted) = self.target.as_deref().map(str::trim) else {
            return catalog
                .highest_platform()
                .or_else(|| catalog.highest_add_on())
                .ok_or(Error::NoTarget);
        };

        if let Ok(level) = wanted.parse::<u32>() {
            let matches = catalog.by_api_level(level);
            return matches
                .iter()
                .find(|t| t.is_platform())
                .or_else(|| matches.first())
                .copied()
                .ok_or_else(|| Error::InvalidConfig {
                    field: "emulator.target".to_string(),
                    value: format!("{wanted} (no target with this API level)"),
                });
        }

        catalog.by_id_label(wanted).ok_or_else(|| Error::InvalidConfig {
            field: "emulator.target".to_string(),
            value: format!("{wanted} (no such target)"),
        })
    }

    /// Resolve the tag/ABI pair for `target`.
    ///
    /// Configured pair if advertised, else any pair with the default tag,
    /// else the first advertised pair, else `None`.
    pub fn select_tag_abi(&self, target: &Target) -> Result<Option<TagAbiPair>> {
        let wanted = self.wanted_tag_abi()?;

        if target.supports(&wanted) {
            return Ok(Some(wanted));
        }
        if let Some(pair) = target.tag_abis.iter().find(|p| p.tag == Tag::Default) {
            tracing::debug!(
                wanted = %wanted,
                chosen = %pair,
                target_label = %target.id_label,
                "configured tag/abi not advertised, using default-tag pair"
            );
            return Ok(Some(*pair));
        }
        if let Some(pair) = target.tag_abis.iter().next() {
            tracing::debug!(wanted = %wanted, chosen = %pair, "using first advertised tag/abi");
            return Ok(Some(*pair));
        }

        tracing::warn!(
            target_label = %target.id_label,
            "target advertises no tag/abi pair, no virtual device possible"
        );
        Ok(None)
    }

    fn wanted_tag_abi(&self) -> Result<TagAbiPair> {
        match &self.tag_abi {
            Some(tag_abi) => tag_abi.parse(),
            None => {
                let abi = self.abi.as_deref().unwrap_or("");
                Ok(TagAbiPair::new(Tag::Default, abi.parse::<Abi>()?))
            }
        }
    }
}
