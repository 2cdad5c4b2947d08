//! Executable-backed plugin processes.
//!
//! [`ExecutableLauncher`] implements [`PluginLauncher`] for plugins shipped as
//! standalone binaries. The handshake arguments are serialised to JSON and
//! passed as the plugin's only command-line argument. The plugin answers by
//! writing a single JSON line to stdout; a reader thread forwards that line
//! over a channel so the wait can be bounded with a timeout. The thread then
//! keeps draining stdout for the life of the process so later writes by the
//! plugin never hit a closed pipe.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::handshake::{HandshakeArgs, HandshakeResponse};
use crate::launcher::{LaunchError, PluginLauncher, PluginProcess};

/// Tracing target for plugin process operations.
const PROCESS_TARGET: &str = "pulse_control::process";

/// Longest handshake line accepted from a plugin, newline included.
pub const MAX_HANDSHAKE_LINE_BYTES: u64 = 64 * 1024;

/// Longest chunk of post-handshake output buffered before it is logged.
const MAX_OUTPUT_CHUNK_BYTES: u64 = 8 * 1024;

/// Launches plugins as child processes.
///
/// # Example
///
/// ```rust,no_run
/// use std::path::Path;
/// use std::time::Duration;
/// use pulse_control::launcher::PluginLauncher;
/// use pulse_control::process::ExecutableLauncher;
/// use pulse_control::HandshakeArgs;
///
/// let args = HandshakeArgs::new([0; 32], "/tmp", false);
/// let mut process = ExecutableLauncher
///     .create(&args, Path::new("/opt/pulse/plugins/cpu"), false)
///     .expect("executable exists");
/// process.start().expect("spawn");
/// let response = process.wait_for_response(Duration::from_secs(3));
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct ExecutableLauncher;

impl PluginLauncher for ExecutableLauncher {
    fn create(
        &self,
        args: &HandshakeArgs,
        path: &Path,
        daemon: bool,
    ) -> Result<Box<dyn PluginProcess>, LaunchError> {
        let plugin = ExecutablePlugin::new(args, path, daemon)?;
        Ok(Box::new(plugin))
    }
}

/// A plugin binary and, once started, its running process.
#[derive(Debug)]
pub struct ExecutablePlugin {
    path: PathBuf,
    encoded_args: String,
    daemon: bool,
    child: Option<Child>,
    responses: Option<Receiver<Result<String, LaunchError>>>,
}

impl ExecutablePlugin {
    /// Prepares the executable at `path` without spawning it.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::ExecutableNotFound`] if `path` is not a file
    /// and [`LaunchError::Spawn`] if the arguments cannot be serialised.
    pub fn new(args: &HandshakeArgs, path: &Path, daemon: bool) -> Result<Self, LaunchError> {
        if !path.is_file() {
            return Err(LaunchError::ExecutableNotFound {
                path: path.to_path_buf(),
            });
        }
        let encoded_args = args.to_json().map_err(|err| LaunchError::Spawn {
            message: format!("failed to serialise handshake arguments: {err}"),
            source: None,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            encoded_args,
            daemon,
            child: None,
            responses: None,
        })
    }

    /// Returns the executable path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Returns `true` when the plugin was launched in daemon mode.
    #[must_use]
    pub const fn is_daemon(&self) -> bool {
        self.daemon
    }

    /// Returns the OS process id once started.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }
}

impl PluginProcess for ExecutablePlugin {
    fn start(&mut self) -> Result<(), LaunchError> {
        if self.child.is_some() {
            return Err(LaunchError::Spawn {
                message: format!("plugin '{}' already started", self.path.display()),
                source: None,
            });
        }

        debug!(
            target: PROCESS_TARGET,
            path = %self.path.display(),
            daemon = self.daemon,
            "spawning plugin process"
        );

        let mut child = Command::new(&self.path)
            .arg(&self.encoded_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| LaunchError::Spawn {
                message: format!("failed to start {}", self.path.display()),
                source: Some(Arc::new(err)),
            })?;

        let Some(stdout) = child.stdout.take() else {
            drop(child.kill());
            drop(child.wait());
            return Err(LaunchError::Spawn {
                message: String::from("failed to capture stdout"),
                source: None,
            });
        };

        debug!(
            target: PROCESS_TARGET,
            path = %self.path.display(),
            pid = child.id(),
            "plugin process spawned"
        );

        self.responses = Some(spawn_reader(self.path.clone(), stdout));
        self.child = Some(child);
        Ok(())
    }

    fn wait_for_response(&mut self, timeout: Duration) -> Result<HandshakeResponse, LaunchError> {
        let Some(responses) = self.responses.as_ref() else {
            return Err(LaunchError::Transport {
                message: String::from("plugin process has not been started"),
                source: None,
            });
        };

        let line = match responses.recv_timeout(timeout) {
            Ok(line) => line?,
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    target: PROCESS_TARGET,
                    path = %self.path.display(),
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "plugin did not answer the handshake in time"
                );
                return Err(LaunchError::Timeout { timeout });
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(LaunchError::Transport {
                    message: String::from("response channel closed"),
                    source: None,
                });
            }
        };

        parse_response(&line)
    }

    fn kill(&mut self) -> Result<(), LaunchError> {
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };
        if matches!(child.try_wait(), Ok(Some(_))) {
            return Ok(());
        }
        child.kill().map_err(|err| LaunchError::Transport {
            message: format!("failed to kill {}", self.path.display()),
            source: Some(Arc::new(err)),
        })?;
        drop(child.wait());
        debug!(target: PROCESS_TARGET, path = %self.path.display(), "plugin process killed");
        Ok(())
    }
}

impl Drop for ExecutablePlugin {
    fn drop(&mut self) {
        // Reaps an exited child; a running one is left alone.
        if let Some(child) = self.child.as_mut() {
            drop(child.try_wait());
        }
    }
}

/// Forwards the first line of the plugin's stdout over a channel, then
/// drains the rest until the plugin closes stdout.
fn spawn_reader(path: PathBuf, stdout: ChildStdout) -> Receiver<Result<String, LaunchError>> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let mut reader = BufReader::new(stdout);
        let outcome = read_handshake_line(&mut reader);
        // The receiver is gone once the plugin handle was dropped.
        drop(sender.send(outcome));
        drain_output(&path, &mut reader);
    });
    receiver
}

/// Reads one newline-terminated handshake line of bounded length.
fn read_handshake_line<R: BufRead>(reader: &mut R) -> Result<String, LaunchError> {
    let mut line = String::new();
    match reader
        .by_ref()
        .take(MAX_HANDSHAKE_LINE_BYTES)
        .read_line(&mut line)
    {
        Ok(0) => Err(LaunchError::Transport {
            message: String::from("plugin closed stdout without a handshake response"),
            source: None,
        }),
        Ok(read) if !line.ends_with('\n') && exceeds_handshake_limit(read) => {
            Err(LaunchError::Transport {
                message: format!("handshake response exceeds {MAX_HANDSHAKE_LINE_BYTES} bytes"),
                source: None,
            })
        }
        Ok(_) => Ok(line),
        Err(err) => Err(LaunchError::Transport {
            message: String::from("failed to read plugin stdout"),
            source: Some(Arc::new(err)),
        }),
    }
}

fn exceeds_handshake_limit(read: usize) -> bool {
    u64::try_from(read).unwrap_or(u64::MAX) >= MAX_HANDSHAKE_LINE_BYTES
}

/// Logs everything the plugin writes after its handshake until EOF.
fn drain_output<R: BufRead>(path: &Path, reader: &mut R) {
    let mut chunk = Vec::new();
    loop {
        chunk.clear();
        match reader
            .by_ref()
            .take(MAX_OUTPUT_CHUNK_BYTES)
            .read_until(b'\n', &mut chunk)
        {
            Ok(0) => break,
            Ok(_) => {
                let output = String::from_utf8_lossy(&chunk);
                debug!(
                    target: PROCESS_TARGET,
                    path = %path.display(),
                    output = %output.trim_end(),
                    "plugin output"
                );
            }
            Err(err) => {
                debug!(
                    target: PROCESS_TARGET,
                    path = %path.display(),
                    error = %err,
                    "stopped reading plugin output"
                );
                break;
            }
        }
    }
}

/// Parses a JSON response line into a [`HandshakeResponse`].
fn parse_response(line: &str) -> Result<HandshakeResponse, LaunchError> {
    serde_json::from_str(line.trim()).map_err(|err| LaunchError::Transport {
        message: format!("plugin produced an invalid handshake response: {err}"),
        source: None,
    })
}
