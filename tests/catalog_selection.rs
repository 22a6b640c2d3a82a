use droid_runner::avd::AvdManager;
use droid_runner::config::CommandsConfig;
use droid_runner::runner::{ProcessResult, ScriptedRunner};
use droid_runner::target::{Abi, Tag, TagAbiPair, TargetCatalog, TargetKind, TargetSelector};
use std::sync::Arc;

const LISTING: &str = "\
Available Android targets:
----------
id: 1 or \"android-17\"
     Name: Android 4.2.2
     Type: Platform
     API level: 17
     Revision: 3
     Skins: HVGA, QVGA, WVGA800 (default)
 Tag/ABIs : default/armeabi-v7a
----------
id: 2 or \"Google Inc.:Google APIs:19\"
     Name: Google APIs
     Type: Add-On
     Vendor: Google Inc.
     Revision: 1
     Description: Android + Google APIs
     Based on Android 4.4.2 (API level 19)
     Skins: WVGA800 (default)
 Tag/ABIs : google_apis/x86, google_apis/armeabi-v7a
----------
id: 3 or \"android-19\"
     Name: Android 4.4.2
     Type: Platform
     API level: 19
     Revision: 4
     Skins: HVGA, WVGA800 (default)
 Tag/ABIs : default/armeabi-v7a, default/x86
----------
id: 4 or \"android-L\"
     Name: Android L (Preview)
     Type: Platform
     API level: L
     Revision: 1
 Tag/ABIs : no ABIs.
";

fn catalog_from_tool() -> TargetCatalog {
    let runner = Arc::new(ScriptedRunner::new(|_| ProcessResult::success(LISTING.lines())));
    let avds = AvdManager::new(runner.clone(), "android", "mksdcard", CommandsConfig::default());
    let catalog = avds.list_targets().unwrap();
    assert_eq!(runner.command_lines(), vec!["android list target"]);
    catalog
}

#[test]
fn test_listing_parsed_from_android_tool() {
    let catalog = catalog_from_tool();
    assert_eq!(catalog.len(), 4);

    let addon = catalog.by_id_label("Google Inc.:Google APIs:19").unwrap();
    assert_eq!(addon.kind, TargetKind::AddOn);
    assert_eq!(addon.api_level, Some(19));
    assert!(addon.has_tag(Tag::GoogleApis));
    assert!(!addon.has_tag(Tag::Default));

    let preview = catalog.by_id_label("android-L").unwrap();
    assert_eq!(preview.api_level, None);
    assert!(preview.tag_abis.is_empty());
}

#[test]
fn test_default_selection_is_highest_platform() {
    let catalog = catalog_from_tool();
    let selection = TargetSelector::new()
        .with_target(None::<String>)
        .with_abi(Some("x86"))
        .select(&catalog)
        .unwrap();

    // android-L has the highest id but no ABI to build a device from.
    assert_eq!(selection.target.id_label, "android-L");
    assert_eq!(selection.tag_abi, None);
}

#[test]
fn test_api_level_prefers_platform_over_add_on() {
    let catalog = catalog_from_tool();
    let selection = TargetSelector::new()
        .with_target(Some("19"))
        .with_abi(Some("x86"))
        .select(&catalog)
        .unwrap();
    assert_eq!(selection.target.id_label, "android-19");
    assert_eq!(selection.tag_abi, Some(TagAbiPair::new(Tag::Default, Abi::X86)));
}

#[test]
fn test_add_on_falls_back_to_advertised_pair() {
    let catalog = catalog_from_tool();
    let selection = TargetSelector::new()
        .with_target(Some("Google Inc.:Google APIs:19"))
        .with_abi(Some("x86"))
        .select(&catalog)
        .unwrap();
    // default/x86 is not offered and no default-tag pair exists, so the
    // first advertised pair in tag/ABI order wins.
    assert_eq!(selection.tag_abi, Some(TagAbiPair::new(Tag::GoogleApis, Abi::X86)));

    let explicit = TargetSelector::new()
        .with_target(Some("Google Inc.:Google APIs:19"))
        .with_tag_abi(Some("google_apis/armeabi-v7a"))
        .select(&catalog)
        .unwrap();
    assert_eq!(
        explicit.tag_abi,
        Some(TagAbiPair::new(Tag::GoogleApis, Abi::ArmeabiV7a))
    );
}

#[test]
fn test_unknown_target_is_config_error() {
    let catalog = catalog_from_tool();
    let err = TargetSelector::new()
        .with_target(Some("android-99"))
        .select(&catalog)
        .unwrap_err();
    assert!(err.is_config());
    assert!(err.to_string().contains("emulator.target"));
}

#[test]
fn test_selection_is_deterministic() {
    let selector = TargetSelector::new().with_target(Some("android-19")).with_abi(Some("x86"));
    let first = selector.select(&catalog_from_tool()).unwrap();
    for _ in 0..10 {
        assert_eq!(selector.select(&catalog_from_tool()).unwrap(), first);
    }

    // Reordering the listing does not change the outcome.
    let blocks: Vec<&str> = LISTING.split("----------").collect();
    let shuffled = format!("----------{}----------{}", blocks[3], blocks[1]);
    let catalog = TargetCatalog::parse(&shuffled).unwrap();
    assert_eq!(selector.select(&catalog).unwrap(), first);
}
