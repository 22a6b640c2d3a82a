mod common;

use common::{FakeDevice, SERIAL};
use droid_runner::config::{Config, SigningConfig};
use droid_runner::device::{AdbBridge, Device};
use droid_runner::emulator::{EmulatorConsole, EmulatorState};
use droid_runner::package::{ApkSigner, PackageInstaller};
use droid_runner::runner::{CommandRunner, ProcessCommand, ProcessResult, ScriptedRunner, SpawnScript};
use droid_runner::util::ToolPaths;
use droid_runner::{Event, Session};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const TARGETS: &[&str] = &[
    "Available Android targets:",
    "----------",
    "id: 1 or \"android-19\"",
    "     Name: Android 4.4.2",
    "     Type: Platform",
    "     API level: 19",
    " Tag/ABIs : default/x86",
];

/// Emulator host: the AVD tool remembers what it created, the emulator is
/// listed online from launch until the console kill.
struct EmulatorHost {
    launched: AtomicBool,
    killed: AtomicBool,
    avds: Mutex<Vec<String>>,
    kills: AtomicUsize,
}

impl EmulatorHost {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            launched: AtomicBool::new(false),
            killed: AtomicBool::new(false),
            avds: Mutex::new(Vec::new()),
            kills: AtomicUsize::new(0),
        })
    }

    fn runner(self: &Arc<Self>, boot_output: &'static [&'static str]) -> Arc<ScriptedRunner> {
        let host = self.clone();
        let spawned = self.clone();
        Arc::new(
            ScriptedRunner::new(move |cmd: &ProcessCommand| host.answer(cmd)).on_spawn(move |_| {
                spawned.launched.store(true, Ordering::SeqCst);
                SpawnScript::runs_after(boot_output.iter().copied())
            }),
        )
    }

    fn answer(&self, cmd: &ProcessCommand) -> ProcessResult {
        let args: Vec<&str> = cmd.args.iter().map(String::as_str).collect();
        let mut avds = self.avds.lock().unwrap();
        match args.as_slice() {
            ["list", "target"] => ProcessResult::success(TARGETS.iter().copied()),
            ["list", "avd"] => ProcessResult::success(
                std::iter::once("Available Android Virtual Devices:".to_string())
                    .chain(avds.iter().map(|name| format!("    Name: {name}"))),
            ),
            ["create", "avd", ..] | ["delete", "avd", ..] => {
                let name = args
                    .iter()
                    .position(|a| *a == "-n")
                    .and_then(|i| args.get(i + 1))
                    .unwrap()
                    .to_string();
                if args[0] == "create" {
                    avds.push(name);
                } else {
                    avds.retain(|n| *n != name);
                }
                ProcessResult::success(Vec::<String>::new())
            }
            ["devices"] => {
                let mut lines = vec!["List of devices attached".to_string()];
                if self.launched.load(Ordering::SeqCst) && !self.killed.load(Ordering::SeqCst) {
                    lines.push("emulator-5554\tdevice".to_string());
                }
                ProcessResult::success(lines)
            }
            [.., "getprop"] => ProcessResult::success(["[ro.product.model]: [sdk]"]),
            _ => ProcessResult::success(Vec::<String>::new()),
        }
    }
}

struct HostConsole(Arc<EmulatorHost>);

impl EmulatorConsole for HostConsole {
    fn kill(&self, port: u16, _timeout: Duration) -> droid_runner::Result<()> {
        assert_eq!(port, 5554);
        self.0.kills.fetch_add(1, Ordering::SeqCst);
        self.0.killed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn emulator_session(dir: &Path, host: &Arc<EmulatorHost>, runner: Arc<ScriptedRunner>, boot_timeout: u64) -> Session {
    let mut config = Config::default();
    config.emulator.boot_timeout = boot_timeout;
    config.emulator.shutdown_timeout = 2;
    droid_runner::builder()
        .with_config(config)
        .workspace_root(dir)
        .tools(ToolPaths::bare())
        .runner(runner)
        .console(Arc::new(HostConsole(host.clone())))
        .poll_interval(Duration::from_millis(10))
        .build()
        .unwrap()
}

fn position(events: &[Event], pred: impl Fn(&Event) -> bool) -> usize {
    events.iter().position(pred).unwrap()
}

#[test]
fn test_emulator_boot_and_teardown_order() {
    let dir = tempfile::tempdir().unwrap();
    let host = EmulatorHost::new();
    let runner = host.runner(&["emulator: loading", "emulator: Boot completed"]);
    let mut session = emulator_session(dir.path(), &host, runner.clone(), 30);
    let rx = session.events().subscribe();

    let device = session.start_container().unwrap();
    assert_eq!(device.serial, "emulator-5554");
    assert_eq!(device.console_port, Some(5554));
    assert_eq!(device.adb_port, Some(5555));
    assert_eq!(session.controller().unwrap().state(), EmulatorState::Ready);
    assert_eq!(runner.count_matching("create avd"), 1);
    assert_eq!(runner.count_matching("input keyevent"), 2);
    let avd_name = session.controller().unwrap().resolved().unwrap().avd_name.clone();
    assert!(avd_name.starts_with("droid-runner-"));

    session.stop_container().unwrap();
    assert_eq!(host.kills.load(Ordering::SeqCst), 1);
    assert_eq!(session.controller().unwrap().state(), EmulatorState::Terminated);
    assert_eq!(session.registry().size(), 0);
    assert!(host.avds.lock().unwrap().is_empty());
    assert_eq!(runner.kills(), 1, "the emulator process is reaped");

    let events: Vec<Event> = rx.try_iter().collect();
    let bridge = position(&events, |e| matches!(e, Event::BridgeInitialized));
    let available = position(&events, |e| matches!(e, Event::AvdAvailable { generated: true, .. }));
    let ready = position(&events, |e| matches!(e, Event::DeviceReady { .. }));
    let shutdown = position(&events, |e| matches!(e, Event::EmulatorShutdown { .. }));
    let deleted = position(&events, |e| matches!(e, Event::AvdDeleted { name } if *name == avd_name));
    assert!(bridge < available);
    assert!(available < ready);
    assert!(ready < shutdown);
    assert!(shutdown < deleted, "the AVD is deleted only once the emulator is offline");
}

#[test]
fn test_boot_timeout_fails_without_ready() {
    let dir = tempfile::tempdir().unwrap();
    let host = EmulatorHost::new();
    let runner = host.runner(&["emulator: loading"]);
    let mut session = emulator_session(dir.path(), &host, runner.clone(), 2);
    let rx = session.events().subscribe();

    let started = Instant::now();
    let err = session.start_container().unwrap_err();
    let elapsed = started.elapsed();
    assert!(err.is_timeout(), "unexpected error: {err}");
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_secs(4), "gave up after {elapsed:?}");
    assert!(err.output().iter().any(|l| l.contains("emulator: loading")));

    let controller = session.controller().unwrap();
    assert_eq!(controller.state(), EmulatorState::Failed);
    assert!(!controller.history().contains(&EmulatorState::Ready));
    assert!(session.device().is_none());
    assert!(!rx.try_iter().any(|e| matches!(e, Event::DeviceReady { .. })));

    session.stop_container().unwrap();
    assert_eq!(session.controller().unwrap().state(), EmulatorState::Terminated);
    assert!(host.avds.lock().unwrap().is_empty(), "the generated AVD is still removed");
    assert_eq!(host.kills.load(Ordering::SeqCst), 0);
}

#[test]
fn test_uninstall_that_never_completes_times_out() {
    let runner: Arc<dyn CommandRunner> = FakeDevice::new().sticky("com.example.stuck").into_runner();
    let signer = ApkSigner::new(
        runner.clone(),
        "jarsigner",
        "keytool",
        SigningConfig::default(),
        "debug.keystore",
    );
    let installer = PackageInstaller::new(AdbBridge::new(runner, "adb"), signer);
    let device = Device::physical(SERIAL);

    let started = Instant::now();
    let err = installer.uninstall(&device, "com.example.stuck").unwrap_err();
    let elapsed = started.elapsed();
    assert!(err.is_timeout());
    assert!(err.to_string().contains("monkey wait (com.example.stuck)"));
    assert!(elapsed >= Duration::from_secs(4), "gave up after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(7));
    assert!(err.output().iter().any(|l| l.contains("package:com.example.stuck")));
}

#[test]
fn test_single_attached_device_is_required() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new(|cmd: &ProcessCommand| {
        if cmd.args.last().is_some_and(|a| a == "devices") {
            ProcessResult::success(["List of devices attached", "AAA\tdevice", "BBB\tdevice"])
        } else {
            ProcessResult::success(Vec::<String>::new())
        }
    }));
    let mut config = Config::default();
    config.emulator.enabled = false;
    let mut session = droid_runner::builder()
        .with_config(config)
        .workspace_root(dir.path())
        .tools(ToolPaths::bare())
        .runner(runner)
        .build()
        .unwrap();

    let err = session.start_container().unwrap_err();
    assert!(err.to_string().contains("found 2"));
    session.stop_container().unwrap();
}
