use droid_runner::config::ConfigLoader;
use std::path::PathBuf;

#[test]
fn test_full_config_parsing() {
    let toml_str = r#"
retain-artifacts = true

[sdk]
root = "/opt/android-sdk"
build-tools = "19.1.0"
android-jar = "/opt/android-sdk/platforms/android-19/android.jar"

[emulator]
target = "android-19"
tag-abi = "google_apis/x86"
avd-name = "ci-phone"
console-port = 5560
boot-timeout = 300
options = "-no-window -gpu off"

[emulator.sdcard]
size = "256M"
generate = true

[signing]
keystore = "keys/debug.keystore"
alias = "ci"

[instrumentation]
server-apk = "vendor/selendroid-server.apk"
port = 9090
readiness-attempts = 30

[logcat]
enabled = true
filter-specs = ["ActivityManager:I", "*:S"]

[variables]
LOCALE = "de_DE"
"#;
    let config = droid_runner::Config::from_toml_str(toml_str).unwrap();
    config.validate().unwrap();

    assert!(config.retain_artifacts);
    assert_eq!(config.sdk.root, Some(PathBuf::from("/opt/android-sdk")));
    assert_eq!(config.sdk.build_tools.as_deref(), Some("19.1.0"));
    assert_eq!(config.emulator.target.as_deref(), Some("android-19"));
    assert_eq!(config.emulator.tag_abi.as_deref(), Some("google_apis/x86"));
    assert_eq!(config.emulator.avd_name.as_deref(), Some("ci-phone"));
    assert_eq!(config.emulator.console_port, Some(5560));
    assert_eq!(config.emulator.boot_timeout().as_secs(), 300);
    assert_eq!(config.emulator.option_args(), vec!["-no-window", "-gpu", "off"]);
    assert_eq!(config.emulator.sdcard.size, "256M");
    assert!(config.emulator.sdcard.generate);
    assert_eq!(config.signing.keystore, Some(PathBuf::from("keys/debug.keystore")));
    assert_eq!(config.signing.alias, "ci");
    assert_eq!(config.signing.store_password, "android");
    assert_eq!(
        config.instrumentation.server_apk,
        Some(PathBuf::from("vendor/selendroid-server.apk"))
    );
    assert_eq!(config.instrumentation.port, 9090);
    assert_eq!(config.instrumentation.readiness_attempts, 30);
    assert_eq!(config.instrumentation.monkey_attempts, 5);
    assert!(config.logcat.enabled);
    assert_eq!(config.logcat.filter_specs, vec!["ActivityManager:I", "*:S"]);
    assert_eq!(config.variables.get("LOCALE").unwrap(), "de_DE");
}

#[test]
fn test_config_loader_standalone_file() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("droid-runner.toml");
    std::fs::write(
        &config_path,
        r#"
[emulator]
enabled = false

[instrumentation]
port = 4444
"#,
    )
    .unwrap();

    let (config, root) = ConfigLoader::new()
        .no_cargo_metadata()
        .workspace_root(dir.path())
        .config_file(&config_path)
        .load()
        .unwrap();

    assert_eq!(root, dir.path());
    assert!(!config.emulator.enabled);
    assert_eq!(config.instrumentation.port, 4444);
    assert_eq!(config.emulator.boot_marker, "boot completed");
}

#[test]
fn test_config_loader_ignores_profile_table_without_selection() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("droid-runner.toml");
    std::fs::write(
        &config_path,
        r#"
[emulator]
boot-timeout = 60

[profiles.slow-ci.emulator]
boot-timeout = 600
"#,
    )
    .unwrap();

    let (config, _) = ConfigLoader::new()
        .no_cargo_metadata()
        .workspace_root(dir.path())
        .config_file(&config_path)
        .load()
        .unwrap();
    assert_eq!(config.emulator.boot_timeout, 60);
}

#[test]
fn test_invalid_values_are_rejected() {
    let config = droid_runner::Config::from_toml_str(
        r#"
[instrumentation]
port = 80
"#,
    )
    .unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.is_config());
    assert!(err.to_string().contains("instrumentation.port"));

    let config = droid_runner::Config::from_toml_str(
        r#"
[emulator]
console-port = 5555
"#,
    )
    .unwrap();
    assert!(config.validate().unwrap_err().is_config());
}

#[test]
fn test_missing_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = ConfigLoader::new()
        .no_cargo_metadata()
        .workspace_root(dir.path())
        .config_file(dir.path().join("absent.toml"))
        .load()
        .unwrap_err();
    assert!(err.is_config());
}
