//! Integration tests driving real plugin executables through the manager.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use pulse_control::process::ExecutableLauncher;
use pulse_control::{
    CatalogedPlugin, ControlError, HostKeyPair, ManagerSettings, PluginKey, PluginManager,
    PluginMeta,
};

/// Serialises script creation and execution. Spawning a script while another
/// thread still holds a writable descriptor to it fails with `ETXTBSY`.
static EXEC_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

struct PluginDir {
    dir: TempDir,
    _guard: MutexGuard<'static, ()>,
}

impl PluginDir {
    fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
        path
    }

    fn log_dir(&self) -> &Path {
        self.dir.path()
    }
}

#[fixture]
fn plugin_dir() -> PluginDir {
    let guard = EXEC_MUTEX.lock().unwrap_or_else(PoisonError::into_inner);
    PluginDir {
        dir: TempDir::new().expect("create temp dir"),
        _guard: guard,
    }
}

fn manager(log_dir: &Path, timeout: Duration) -> PluginManager<ExecutableLauncher> {
    PluginManager::new(
        ExecutableLauncher,
        HostKeyPair::generate(),
        ManagerSettings::new(timeout, log_dir),
    )
}

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    condition()
}

fn is_running(pid: &str) -> bool {
    Command::new("sh")
        .arg("-c")
        .arg(format!("kill -0 {pid}"))
        .stderr(Stdio::null())
        .status()
        .expect("run kill")
        .success()
}

const SUCCESS_LINE: &str = r#"{"state":"success","meta":{"name":"shell","version":1},"plugin_type":"collector","token":"tok"}"#;

#[rstest]
fn loads_and_unloads_a_shell_plugin(plugin_dir: PluginDir) {
    let path = plugin_dir.script("shell-collector", &format!("echo '{SUCCESS_LINE}'"));
    let manager = manager(plugin_dir.log_dir(), Duration::from_secs(5));

    let record = manager.load_plugin(&path).expect("load");

    assert_eq!(record.name(), "shell");
    assert_eq!(record.type_name(), "collector");
    assert_eq!(record.token(), "tok");
    assert_eq!(record.path(), path.as_path());
    manager
        .unload_plugin(&PluginMeta::new("shell", 1))
        .expect("unload");
    assert!(manager.registry().is_empty());
}

#[rstest]
fn plugin_receives_handshake_arguments(plugin_dir: PluginDir) {
    // Answers only when the single argument carries the expected fields.
    let body = format!(
        r#"case "$1" in
  *'"run_as_daemon":false'*) ;;
  *) echo '{{"state":"error","error_message":"missing daemon flag"}}'; exit 0 ;;
esac
case "$1" in
  *'"plugin_log_path":"{log}"'*) echo '{SUCCESS_LINE}' ;;
  *) echo '{{"state":"error","error_message":"wrong log path"}}' ;;
esac"#,
        log = plugin_dir.log_dir().display()
    );
    let path = plugin_dir.script("arg-checker", &body);
    let manager = manager(plugin_dir.log_dir(), Duration::from_secs(5));

    let record = manager.load_plugin(&path).expect("arguments accepted");
    assert_eq!(record.status(), "loaded");
}

#[rstest]
fn error_response_is_a_rejection(plugin_dir: PluginDir) {
    let path = plugin_dir.script(
        "misconfigured",
        r#"echo '{"state":"error","error_message":"bad config"}'"#,
    );
    let manager = manager(plugin_dir.log_dir(), Duration::from_secs(5));

    let err = manager.load_plugin(&path).expect_err("rejected");

    assert!(
        matches!(err, ControlError::HandshakeRejected { ref message, .. } if message == "bad config"),
        "unexpected error: {err}"
    );
    assert!(manager.registry().is_empty());
}

#[rstest]
fn silent_plugin_times_out(plugin_dir: PluginDir) {
    let path = plugin_dir.script("silent", "sleep 2");
    let manager = manager(plugin_dir.log_dir(), Duration::from_millis(200));

    let err = manager.load_plugin(&path).expect_err("timeout");

    assert!(
        matches!(err, ControlError::HandshakeTimeout { timeout_ms: 200, .. }),
        "unexpected error: {err}"
    );
    assert!(manager.registry().is_empty());
}

#[rstest]
#[case::no_output("exit 0")]
#[case::garbage("echo 'definitely not json'")]
fn unusable_output_is_a_transport_failure(plugin_dir: PluginDir, #[case] body: &str) {
    let path = plugin_dir.script("broken", body);
    let manager = manager(plugin_dir.log_dir(), Duration::from_secs(5));

    let err = manager.load_plugin(&path).expect_err("transport failure");

    assert!(
        matches!(err, ControlError::HandshakeTransport { .. }),
        "unexpected error: {err}"
    );
}

#[rstest]
fn missing_executable_is_a_spawn_failure(plugin_dir: PluginDir) {
    let manager = manager(plugin_dir.log_dir(), Duration::from_secs(1));
    let err = manager
        .load_plugin(plugin_dir.log_dir().join("absent"))
        .expect_err("missing");
    assert!(matches!(err, ControlError::SpawnFailure { .. }));
}

#[rstest]
fn directory_is_not_an_executable(plugin_dir: PluginDir) {
    let manager = manager(plugin_dir.log_dir(), Duration::from_secs(1));
    let err = manager
        .load_plugin(plugin_dir.log_dir())
        .expect_err("directories are rejected");
    assert!(err.to_string().contains("executable not found"));
}

#[rstest]
fn plugin_survives_writing_after_the_handshake(plugin_dir: PluginDir) {
    let marker = plugin_dir.log_dir().join("still-alive");
    let body = format!(
        "echo '{SUCCESS_LINE}'\nsleep 0.3\necho 'collecting'\necho 'collecting more'\ntouch '{}'",
        marker.display()
    );
    let path = plugin_dir.script("chatty", &body);
    let manager = manager(plugin_dir.log_dir(), Duration::from_secs(5));

    manager.load_plugin(&path).expect("load");

    assert!(
        wait_until(Duration::from_secs(5), || marker.exists()),
        "plugin stopped after writing to stdout"
    );
    manager.terminate_processes();
}

#[rstest]
fn terminate_processes_kills_plugins_left_running(plugin_dir: PluginDir) {
    let pid_file = plugin_dir.log_dir().join("plugin.pid");
    let body = format!(
        "echo $$ > '{}'\necho '{SUCCESS_LINE}'\nexec sleep 30",
        pid_file.display()
    );
    let path = plugin_dir.script("long-running", &body);
    let manager = manager(plugin_dir.log_dir(), Duration::from_secs(5));

    manager.load_plugin(&path).expect("load");
    let pid_text = fs::read_to_string(&pid_file).expect("pid file");
    let pid = pid_text.trim();
    manager
        .unload_plugin(&PluginMeta::new("shell", 1))
        .expect("unload");
    assert!(is_running(pid), "unload leaves the process running");
    assert_eq!(manager.process_count(), 1);

    assert_eq!(manager.terminate_processes(), 1);

    assert!(!is_running(pid), "process was not terminated");
    assert_eq!(manager.process_count(), 0);
}

#[rstest]
fn overlong_handshake_line_is_a_transport_failure(plugin_dir: PluginDir) {
    let path = plugin_dir.script("flood", "printf '%070000d' 0\nexec sleep 5");
    let manager = manager(plugin_dir.log_dir(), Duration::from_secs(3));

    let started = Instant::now();
    let err = manager.load_plugin(&path).expect_err("line too long");

    assert!(
        matches!(err, ControlError::HandshakeTransport { .. }),
        "unexpected error: {err}"
    );
    assert!(started.elapsed() < Duration::from_secs(3), "waited for the timeout");
    assert_eq!(manager.terminate_processes(), 1);
}
