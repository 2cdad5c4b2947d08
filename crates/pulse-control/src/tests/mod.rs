//! Crate-level test doubles, integration and BDD tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::handshake::{HandshakeArgs, HandshakeResponse};
use crate::keys::HostKeyPair;
use crate::launcher::{LaunchError, PluginLauncher, PluginProcess};
use crate::manager::{ManagerSettings, PluginManager};
use crate::record::{CatalogedPlugin, PluginMeta, PluginType};


/// Outcome a scripted plugin produces.
#[derive(Debug, Clone)]
pub(crate) enum Script {
    /// The plugin answers with the given response.
    Respond(HandshakeResponse),
    /// The launcher cannot prepare the executable.
    FailCreate,
    /// The process fails to start.
    FailStart,
    /// The plugin never answers.
    Timeout,
    /// The response channel breaks.
    BrokenPipe,
}

impl Script {
    pub(crate) fn success(name: &str, version: i64, plugin_type: PluginType, token: &str) -> Self {
        Self::Respond(HandshakeResponse::success(
            PluginMeta::new(name, version),
            plugin_type,
            token,
        ))
    }

    pub(crate) fn rejected(message: &str) -> Self {
        Self::Respond(HandshakeResponse::error(message))
    }
}

/// Counters shared between a launcher and the processes it creates.
#[derive(Debug, Default)]
pub(crate) struct LaunchCounters {
    pub(crate) created: AtomicUsize,
    pub(crate) started: AtomicUsize,
    pub(crate) killed: AtomicUsize,
    pub(crate) last_args: Mutex<Option<(HandshakeArgs, bool)>>,
}

impl LaunchCounters {
    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub(crate) fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn killed(&self) -> usize {
        self.killed.load(Ordering::SeqCst)
    }

    pub(crate) fn last_args(&self) -> Option<(HandshakeArgs, bool)> {
        self.last_args
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Launcher returning canned outcomes keyed by executable path.
#[derive(Debug, Default)]
pub(crate) struct ScriptedLauncher {
    scripts: Mutex<HashMap<PathBuf, Script>>,
    counters: Arc<LaunchCounters>,
}

impl ScriptedLauncher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(self, path: &str, script: Script) -> Self {
        self.script(path, script);
        self
    }

    pub(crate) fn script(&self, path: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(PathBuf::from(path), script);
    }

    pub(crate) fn counters(&self) -> Arc<LaunchCounters> {
        Arc::clone(&self.counters)
    }
}

impl PluginLauncher for ScriptedLauncher {
    fn create(
        &self,
        args: &HandshakeArgs,
        path: &Path,
        daemon: bool,
    ) -> Result<Box<dyn PluginProcess>, LaunchError> {
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        *self
            .counters
            .last_args
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some((args.clone(), daemon));

        let script = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned();
        match script {
            None | Some(Script::FailCreate) => Err(LaunchError::ExecutableNotFound {
                path: path.to_path_buf(),
            }),
            Some(script) => Ok(Box::new(ScriptedProcess {
                script,
                counters: Arc::clone(&self.counters),
            })),
        }
    }
}

struct ScriptedProcess {
    script: Script,
    counters: Arc<LaunchCounters>,
}

impl PluginProcess for ScriptedProcess {
    fn start(&mut self) -> Result<(), LaunchError> {
        self.counters.started.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::FailStart => Err(LaunchError::Spawn {
                message: String::from("permission denied"),
                source: None,
            }),
            _ => Ok(()),
        }
    }

    fn wait_for_response(&mut self, timeout: Duration) -> Result<HandshakeResponse, LaunchError> {
        match &self.script {
            Script::Respond(response) => Ok(response.clone()),
            Script::Timeout => Err(LaunchError::Timeout { timeout }),
            Script::BrokenPipe | Script::FailCreate | Script::FailStart => {
                Err(LaunchError::Transport {
                    message: String::from("broken pipe"),
                    source: None,
                })
            }
        }
    }

    fn kill(&mut self) -> Result<(), LaunchError> {
        self.counters.killed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) fn manager_with(launcher: ScriptedLauncher) -> PluginManager<ScriptedLauncher> {
    PluginManager::new(
        launcher,
        HostKeyPair::from_secret_bytes(&[42; 32]),
        ManagerSettings::default(),
    )
}

#[test]
fn end_to_end_load_then_unload() {
    let launcher = ScriptedLauncher::new().with(
        "/bin/collector-v1",
        Script::success("collector", 1, PluginType::Collector, "abc"),
    );
    let manager = manager_with(launcher);

    let record = manager.load_plugin("/bin/collector-v1").expect("load");
    assert_eq!(manager.registry().len(), 1);
    assert_eq!(record.status(), "loaded");
    assert_eq!(record.type_name(), "collector");
    assert_eq!(record.token(), "abc");

    manager
        .unload_plugin(&PluginMeta::new("collector", 1))
        .expect("unload");
    assert!(manager.registry().is_empty());
    assert_eq!(record.status(), "unloaded");
}
