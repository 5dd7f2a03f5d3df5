#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use scanward_core::{
    JobId, ProcessOutput, RunnerError, ScanInvocation, ScanJob, ScanRunner,
    ScanState, SqliteJobStore,
};
use tempfile::TempDir;
use tokio::sync::{Mutex, Semaphore};

pub const TWO_HOSTS: &str = r#"[
{ "ip": "10.0.0.5", "timestamp": "1700000000", "ports": [ {"port": 80, "proto": "tcp", "status": "open", "reason": "syn-ack", "ttl": 64} ] },
{ "ip": "10.0.0.7", "timestamp": "1700000001", "ports": [ {"port": 443, "proto": "tcp", "status": "open", "reason": "syn-ack", "ttl": 64} ] }
]"#;

/// Store backed by a SQLite file inside a temp directory.
pub async fn temp_store() -> (SqliteJobStore, TempDir) {
    let dir = TempDir::new().expect("temp dir");
    let store = open_store(&dir).await;
    (store, dir)
}

pub async fn open_store(dir: &TempDir) -> SqliteJobStore {
    let url = format!("sqlite://{}", dir.path().join("scans.db").display());
    SqliteJobStore::connect(&url, 4)
        .await
        .expect("sqlite store should open")
}

/// What a scripted scanner does when invoked.
#[derive(Debug, Clone)]
pub enum Script {
    /// Writes the document to the output path and exits 0.
    Succeed(String),
    /// Exits 0 without writing anything.
    SucceedWithoutOutput,
    /// Exits with the code, printing the text on stderr.
    Exit(i32, String),
    /// The process could not be started.
    SpawnFailure,
}

/// Fake scanner that follows a queue of scripts, falling back to the last
/// one, and optionally holds each run until released.
#[derive(Debug)]
pub struct ScriptedRunner {
    scripts: Mutex<VecDeque<Script>>,
    fallback: Script,
    gate: Option<Arc<Semaphore>>,
    pub invocations: Mutex<Vec<ScanInvocation>>,
    running: AtomicUsize,
    pub max_concurrent: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new(script: Script) -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            fallback: script,
            gate: None,
            invocations: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
        }
    }

    /// Runs `scripts` in order before falling back to `fallback`.
    pub fn sequence(scripts: Vec<Script>, fallback: Script) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::new(fallback)
        }
    }

    /// Each run waits for a permit on `gate` before finishing.
    pub fn gated(script: Script, gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(script)
        }
    }

    pub async fn invocation_count(&self) -> usize {
        self.invocations.lock().await.len()
    }
}

#[async_trait]
impl ScanRunner for ScriptedRunner {
    async fn run(
        &self,
        invocation: &ScanInvocation,
    ) -> Result<ProcessOutput, RunnerError> {
        self.invocations.lock().await.push(invocation.clone());
        let script = self
            .scripts
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now_running, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate open").forget();
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        match script {
            Script::Succeed(document) => {
                tokio::fs::write(&invocation.output_path, document)
                    .await
                    .expect("write scan output");
                Ok(output(0, ""))
            }
            Script::SucceedWithoutOutput => Ok(output(0, "")),
            Script::Exit(code, stderr) => Ok(output(code, &stderr)),
            Script::SpawnFailure => Err(RunnerError::Spawn {
                program: "masscan".into(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "No such file or directory",
                ),
            }),
        }
    }
}

fn output(code: i32, stderr: &str) -> ProcessOutput {
    ProcessOutput {
        exit_code: Some(code),
        stderr: stderr.to_string(),
        elapsed: Duration::from_millis(1),
    }
}

/// Polls the store until the job reaches a terminal state.
pub async fn wait_for_terminal(
    store: &SqliteJobStore,
    id: &JobId,
) -> ScanJob {
    use scanward_core::JobStore;

    for _ in 0..200 {
        if let Some(job) = store.get(id).await.expect("get job") {
            if job.state.is_terminal() {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {id} never reached a terminal state");
}

/// Polls until `predicate` holds or five seconds pass.
pub async fn wait_until<F>(mut predicate: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not met in time");
}

pub fn state_rank(state: ScanState) -> u8 {
    match state {
        ScanState::Starting => 0,
        ScanState::Running => 1,
        ScanState::Completed | ScanState::Failed => 2,
    }
}
