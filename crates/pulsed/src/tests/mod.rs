//! Daemon bootstrap and run-loop tests.

use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use mockall::mock;
use rstest::{fixture, rstest};

use pulse_config::{Config, LogFormat};
use pulse_control::{
    ControlError, HandshakeArgs, HandshakeResponse, HostKeyPair, LaunchError, PluginKey,
    PluginLauncher, PluginMeta, PluginProcess, PluginType,
};

use super::*;
use crate::telemetry::daemon_filter;

mock! {
    Process {}

    impl PluginProcess for Process {
        fn start(&mut self) -> Result<(), LaunchError>;
        fn wait_for_response(&mut self, timeout: Duration) -> Result<HandshakeResponse, LaunchError>;
        fn kill(&mut self) -> Result<(), LaunchError>;
    }
}

mock! {
    Launcher {}

    impl PluginLauncher for Launcher {
        fn create(
            &self,
            args: &HandshakeArgs,
            path: &Path,
            daemon: bool,
        ) -> Result<Box<dyn PluginProcess>, LaunchError>;
    }
}

impl std::fmt::Debug for MockLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLauncher").finish_non_exhaustive()
    }
}

fn utf8(paths: &[&str]) -> Vec<Utf8PathBuf> {
    paths.iter().copied().map(Utf8PathBuf::from).collect()
}

struct ImmediateShutdown;

impl ShutdownSignal for ImmediateShutdown {
    fn wait(&self) -> Result<(), ShutdownError> {
        Ok(())
    }
}

struct BrokenShutdown;

impl ShutdownSignal for BrokenShutdown {
    fn wait(&self) -> Result<(), ShutdownError> {
        Err(ShutdownError::Install {
            source: io::Error::other("signals unavailable"),
        })
    }
}

struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<ortho_config::OrthoError>> {
        Config::load_from_iter([
            OsString::from("pulsed"),
            OsString::from("--handshake-timeout-secs"),
            OsString::from("soon"),
        ])
    }
}

/// Launcher whose plugins answer with their file stem as the name, except
/// for paths containing `broken`, which fail to spawn.
fn answering_launcher() -> MockLauncher {
    let mut launcher = MockLauncher::new();
    launcher.expect_create().returning(|_, path, _| {
        if path.to_string_lossy().contains("broken") {
            return Err(LaunchError::ExecutableNotFound {
                path: path.to_path_buf(),
            });
        }
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut process = MockProcess::new();
        process.expect_start().returning(|| Ok(()));
        process.expect_kill().returning(|| Ok(()));
        process.expect_wait_for_response().returning(move |_| {
            Ok(HandshakeResponse::success(
                PluginMeta::new(name.clone(), 1),
                PluginType::Collector,
                "token",
            ))
        });
        Ok(Box::new(process))
    });
    launcher
}

#[fixture]
fn config() -> Config {
    Config {
        autoload_plugins: utf8(&["/opt/pulse/plugins/cpu", "/opt/pulse/plugins/disk"]),
        ..Config::default()
    }
}

#[rstest]
fn bootstrap_applies_configured_settings(config: Config) {
    let config = Config {
        handshake_timeout_secs: 7,
        plugin_log_path: "/var/log/pulse".into(),
        ..config
    };
    let daemon = bootstrap_with(
        &StaticConfigLoader::new(config),
        answering_launcher(),
        HostKeyPair::generate(),
    )
    .expect("bootstrap");

    let settings = daemon.manager().settings();
    assert_eq!(settings.handshake_timeout(), Duration::from_secs(7));
    assert_eq!(settings.plugin_log_path(), Path::new("/var/log/pulse"));
    assert!(daemon.manager().registry().is_empty());
}

#[test]
fn loader_failure_is_reported() {
    let err = bootstrap_with(
        &FailingConfigLoader,
        answering_launcher(),
        HostKeyPair::generate(),
    )
    .expect_err("malformed configuration");
    assert!(matches!(err, BootstrapError::Configuration { .. }));
}

#[test]
fn invalid_configuration_is_rejected_before_telemetry() {
    let loader = StaticConfigLoader::new(Config {
        handshake_timeout_secs: 0,
        ..Config::default()
    });
    let err = bootstrap_with(&loader, answering_launcher(), HostKeyPair::generate())
        .expect_err("zero timeout");
    assert!(matches!(err, BootstrapError::InvalidConfiguration { .. }));
}

#[rstest]
fn autoload_continues_past_failures(config: Config) {
    let config = Config {
        autoload_plugins: utf8(&[
            "/opt/pulse/plugins/cpu",
            "/opt/pulse/plugins/broken",
            "/opt/pulse/plugins/disk",
        ]),
        ..config
    };
    let daemon = bootstrap_with(
        &StaticConfigLoader::new(config),
        answering_launcher(),
        HostKeyPair::generate(),
    )
    .expect("bootstrap");

    let report = daemon.autoload();

    assert_eq!(report.loaded, 2);
    assert_eq!(report.failed.len(), 1);
    let (path, error) = report.failed.first().expect("one failure");
    assert_eq!(path, "/opt/pulse/plugins/broken");
    assert!(matches!(error, ControlError::SpawnFailure { .. }));
    let names: Vec<String> = daemon
        .manager()
        .catalog()
        .iter()
        .map(|record| record.name().to_owned())
        .collect();
    assert_eq!(names, vec!["cpu", "disk"]);
}

#[rstest]
fn run_unloads_everything_on_shutdown(config: Config) {
    let summary = run_with(
        &StaticConfigLoader::new(config),
        answering_launcher(),
        &ImmediateShutdown,
    )
    .expect("run");

    assert_eq!(summary.autoload.loaded, 2);
    assert!(summary.autoload.failed.is_empty());
    assert_eq!(summary.unloaded, 2);
    assert_eq!(summary.terminated, 2);
}

#[test]
fn shutdown_kills_each_plugin_process_once() {
    let config = Config {
        autoload_plugins: utf8(&["/opt/pulse/plugins/cpu", "/opt/pulse/plugins/slow"]),
        ..Config::default()
    };
    let mut launcher = MockLauncher::new();
    launcher.expect_create().times(2).returning(|_, path, _| {
        let slow = path.ends_with("slow");
        let mut process = MockProcess::new();
        process.expect_start().returning(|| Ok(()));
        process.expect_kill().times(1).returning(|| Ok(()));
        process.expect_wait_for_response().returning(move |timeout| {
            if slow {
                Err(LaunchError::Timeout { timeout })
            } else {
                Ok(HandshakeResponse::success(
                    PluginMeta::new("cpu", 1),
                    PluginType::Collector,
                    "token",
                ))
            }
        });
        Ok(Box::new(process))
    });

    let summary = run_with(&StaticConfigLoader::new(config), launcher, &ImmediateShutdown)
        .expect("run");

    assert_eq!(summary.autoload.loaded, 1);
    assert_eq!(summary.autoload.failed.len(), 1);
    assert_eq!(summary.unloaded, 1);
    assert_eq!(summary.terminated, 2);
}

#[rstest]
fn signal_failure_is_surfaced(config: Config) {
    let err = run_with(
        &StaticConfigLoader::new(config),
        answering_launcher(),
        &BrokenShutdown,
    )
    .expect_err("signal install failure");
    assert!(matches!(err, DaemonError::Shutdown(_)));
    assert!(err.to_string().contains("signals unavailable"));
}

#[test]
fn telemetry_initialisation_is_idempotent() {
    let first = initialise_telemetry(&Config::default()).expect("first");
    let second = initialise_telemetry(&Config {
        log_format: LogFormat::Compact,
        ..Config::default()
    })
    .expect("second");
    assert_eq!(first, second, "later calls report the installed subscriber");
}

#[test]
fn plugin_output_is_capped_unless_configured() {
    let filter = daemon_filter("debug").expect("valid filter");
    assert!(filter.to_string().contains("pulse_control::process=info"));

    let filter = daemon_filter("info,pulse_control::process=trace").expect("valid filter");
    let rendered = filter.to_string();
    assert!(rendered.contains("pulse_control::process=trace"));
    assert!(!rendered.contains("pulse_control::process=info"));
}

#[test]
fn malformed_filter_names_the_expression() {
    let err = daemon_filter("pulse_control=notalevel").expect_err("bad level");
    assert!(matches!(
        err,
        TelemetryError::Filter { ref filter, .. } if filter == "pulse_control=notalevel"
    ));
}
