//! In-memory encoder engine for tests.
//!
//! Sessions keep their virtual files in a map and "encode" by checking that the
//! inputs named after `-i` exist, streaming scripted progress, and writing fixed
//! output bytes. Failures and pauses can be injected per stage.

use super::{report_progress, validate_virtual_name, EncoderBackend, EncoderSession, EngineError, ProgressSender};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Pauses an operation until the test releases it.
#[derive(Clone, Default)]
pub struct Gate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl Gate {
    /// Wait until the gated operation has started.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the gated operation continue.
    pub fn release(&self) {
        self.release.notify_one();
    }

    async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

#[derive(Default)]
struct Script {
    bootstrap_error: Option<String>,
    exec_error: Option<String>,
    progress: Vec<f64>,
    output: Vec<u8>,
    /// Gates keyed by the virtual file name whose write they pause
    write_gates: HashMap<String, Gate>,
    /// Gates keyed by an argument the paused command contains
    exec_gates: HashMap<String, Gate>,
}

pub struct FakeBackend {
    script: Arc<Mutex<Script>>,
    bootstraps: AtomicUsize,
    sessions: Mutex<Vec<Arc<FakeSession>>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        let script = Script {
            progress: vec![0.25, 0.5, 0.75, 1.0],
            output: vec![0u8; 2048],
            ..Script::default()
        };
        Self {
            script: Arc::new(Mutex::new(script)),
            bootstraps: AtomicUsize::new(0),
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn with_progress(self, steps: Vec<f64>) -> Self {
        self.script.lock().unwrap().progress = steps;
        self
    }

    pub fn with_output(self, bytes: Vec<u8>) -> Self {
        self.script.lock().unwrap().output = bytes;
        self
    }

    pub fn fail_bootstrap(&self, message: Option<&str>) {
        self.script.lock().unwrap().bootstrap_error = message.map(str::to_string);
    }

    pub fn fail_exec(&self, message: Option<&str>) {
        self.script.lock().unwrap().exec_error = message.map(str::to_string);
    }

    /// Pause the next write of `name` in any session.
    pub fn gate_write(&self, name: &str) -> Gate {
        let gate = Gate::default();
        self.script
            .lock()
            .unwrap()
            .write_gates
            .insert(name.to_string(), gate.clone());
        gate
    }

    /// Pause the next command that has `arg` among its arguments.
    pub fn gate_exec(&self, arg: &str) -> Gate {
        let gate = Gate::default();
        self.script
            .lock()
            .unwrap()
            .exec_gates
            .insert(arg.to_string(), gate.clone());
        gate
    }

    pub fn bootstrap_count(&self) -> usize {
        self.bootstraps.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> Vec<Arc<FakeSession>> {
        self.sessions.lock().unwrap().clone()
    }

    /// Total number of virtual files left across all sessions.
    pub fn leftover_files(&self) -> usize {
        self.sessions().iter().map(|s| s.file_names().len()).sum()
    }
}

#[async_trait]
impl EncoderBackend for FakeBackend {
    async fn bootstrap(&self) -> Result<Arc<dyn EncoderSession>, EngineError> {
        self.bootstraps.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        if let Some(message) = self.script.lock().unwrap().bootstrap_error.clone() {
            return Err(EngineError::Bootstrap(message));
        }

        let session = Arc::new(FakeSession {
            script: self.script.clone(),
            files: Mutex::new(HashMap::new()),
            commands: Mutex::new(Vec::new()),
            loaded: AtomicBool::new(true),
        });
        self.sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }
}

pub struct FakeSession {
    script: Arc<Mutex<Script>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    commands: Mutex<Vec<Vec<String>>>,
    loaded: AtomicBool,
}

impl FakeSession {
    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn commands(&self) -> Vec<Vec<String>> {
        self.commands.lock().unwrap().clone()
    }

    /// Mark the session unusable, as after an engine crash.
    pub fn unload(&self) {
        self.loaded.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl EncoderSession for FakeSession {
    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    async fn write_file(&self, name: &str, data: &[u8]) -> Result<(), EngineError> {
        validate_virtual_name(name)?;
        let gate = self.script.lock().unwrap().write_gates.remove(name);
        if let Some(gate) = gate {
            gate.pass().await;
        }
        self.files
            .lock()
            .unwrap()
            .insert(name.to_string(), data.to_vec());
        Ok(())
    }

    async fn execute(&self, args: &[String], progress: ProgressSender) -> Result<(), EngineError> {
        self.commands.lock().unwrap().push(args.to_vec());

        let (gate, steps, error, output) = {
            let mut script = self.script.lock().unwrap();
            let key = script
                .exec_gates
                .keys()
                .find(|k| args.iter().any(|a| a == *k))
                .cloned();
            let gate = key.and_then(|k| script.exec_gates.remove(&k));
            (
                gate,
                script.progress.clone(),
                script.exec_error.clone(),
                script.output.clone(),
            )
        };

        if let Some(gate) = gate {
            gate.pass().await;
        }

        for pair in args.windows(2) {
            if pair[0] == "-i" && !self.files.lock().unwrap().contains_key(&pair[1]) {
                return Err(EngineError::Exec(format!("{}: No such file or directory", pair[1])));
            }
        }

        for step in steps {
            report_progress(&progress, step);
            tokio::task::yield_now().await;
        }

        if let Some(message) = error {
            return Err(EngineError::Exec(message));
        }

        if let Some(out) = args.last() {
            self.files.lock().unwrap().insert(out.clone(), output);
        }
        Ok(())
    }

    async fn read_file(&self, name: &str) -> Result<Vec<u8>, EngineError> {
        self.files
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(name.to_string()))
    }

    async fn delete_file(&self, name: &str) -> Result<(), EngineError> {
        self.files
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| EngineError::NotFound(name.to_string()))
    }
}
