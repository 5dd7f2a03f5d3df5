#![allow(dead_code)]

use std::{fs, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum_test::TestServer;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use scanward_config::{ConfigLoader, sources::EnvConfig};
use scanward_core::{
    ProcessOutput, RunnerError, ScanInvocation, ScanOrchestrator, ScanRunner,
    SqliteJobStore,
};
use scanward_server::{AppState, create_app};

/// Masscan-style document with a trailing comma before the closing bracket.
pub const ONE_HOST: &str = r#"[
{ "ip": "10.0.0.5", "timestamp": "1700000000", "ports": [ {"port": 443, "proto": "tcp", "status": "open", "reason": "syn-ack", "ttl": 64} ] },
]"#;

#[derive(Debug, Clone)]
pub enum Behaviour {
    Succeed(String),
    Exit(i32, String),
}

/// Scanner stand-in that writes a canned document or exits with an error.
/// With a gate, every run first waits for a permit.
#[derive(Debug)]
pub struct FakeScanner {
    behaviour: Behaviour,
    gate: Option<Arc<Semaphore>>,
}

impl FakeScanner {
    pub fn new(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            gate: None,
        }
    }

    pub fn gated(behaviour: Behaviour, gate: Arc<Semaphore>) -> Self {
        Self {
            behaviour,
            gate: Some(gate),
        }
    }
}

#[async_trait]
impl ScanRunner for FakeScanner {
    async fn run(
        &self,
        invocation: &ScanInvocation,
    ) -> Result<ProcessOutput, RunnerError> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.map_err(|err| {
                RunnerError::Wait(std::io::Error::other(err.to_string()))
            })?;
        }

        match &self.behaviour {
            Behaviour::Succeed(document) => {
                tokio::fs::write(&invocation.output_path, document)
                    .await
                    .map_err(RunnerError::Wait)?;
                Ok(ProcessOutput {
                    exit_code: Some(0),
                    stderr: String::new(),
                    elapsed: Duration::ZERO,
                })
            }
            Behaviour::Exit(code, stderr) => Ok(ProcessOutput {
                exit_code: Some(*code),
                stderr: stderr.clone(),
                elapsed: Duration::ZERO,
            }),
        }
    }
}

pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
    _tempdir: TempDir,
}

pub async fn build_test_app(runner: FakeScanner) -> TestApp {
    build_test_app_with(runner, "").await
}

/// `extra` is appended to the generated `scanward.toml`.
pub async fn build_test_app_with(runner: FakeScanner, extra: &str) -> TestApp {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let output_dir = tempdir.path().join("out");
    let config_path = tempdir.path().join("scanward.toml");
    fs::write(
        &config_path,
        format!(
            "[database]\nurl = \"sqlite://{}/scans.db\"\n\n[scanner]\nprogram = \"sh\"\noutput_dir = \"{}\"\n\n{extra}",
            tempdir.path().display(),
            output_dir.display(),
        ),
    )
    .expect("write config");

    let config = ConfigLoader::new()
        .with_config_path(&config_path)
        .load_with_env(EnvConfig::default())
        .expect("load config")
        .config;

    let store = SqliteJobStore::connect(
        &config.database.url,
        config.database.max_connections,
    )
    .await
    .expect("open store");

    let orchestrator = ScanOrchestrator::start(
        config.orchestrator.clone(),
        &config.scanner,
        Arc::new(store),
        Arc::new(runner),
        CancellationToken::new(),
    )
    .await
    .expect("start orchestrator");

    let state = AppState::new(Arc::new(orchestrator), Arc::new(config));
    let server = TestServer::new(create_app(state.clone())).expect("test server");

    TestApp {
        server,
        state,
        _tempdir: tempdir,
    }
}

/// Polls `/scan_status/{id}` until the job is terminal.
pub async fn wait_for_terminal(server: &TestServer, id: &str) -> Value {
    for _ in 0..200 {
        let body: Value = server.get(&format!("/scan_status/{id}")).await.json();
        if matches!(body["state"].as_str(), Some("completed" | "failed")) {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("scan {id} did not finish in time");
}

pub async fn wait_for_health<F>(server: &TestServer, predicate: F) -> Value
where
    F: Fn(&Value) -> bool,
{
    for _ in 0..200 {
        let body: Value = server.get("/health").await.json();
        if predicate(&body) {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("health condition never held");
}
