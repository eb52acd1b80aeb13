//! Capability for typing text into, or interrupting, an agent's terminal.
//!
//! The relay never touches the clipboard or keyboard itself. It hands the
//! request to an [`InputInjector`], which in production shells out to a
//! platform script or calls a local helper service.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InjectError {
    #[error("no injector configured")]
    Unavailable,
    #[error("injection failed: {0}")]
    Failed(String),
    #[error("injection timed out after {0:?}")]
    TimedOut(Duration),
}

pub type InjectFuture<'a> = Pin<Box<dyn Future<Output = Result<(), InjectError>> + Send + 'a>>;

pub trait InputInjector: Send + Sync {
    /// Paste `text` into the agent's input and submit it.
    fn inject<'a>(&'a self, agent_id: &'a str, text: &'a str) -> InjectFuture<'a>;

    /// Send the interrupt key sequence to the agent.
    fn interrupt<'a>(&'a self, agent_id: &'a str) -> InjectFuture<'a>;
}

/// Run an injector call with an upper bound on how long it may take.
pub async fn with_timeout(
    limit: Duration,
    call: InjectFuture<'_>,
) -> Result<(), InjectError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(InjectError::TimedOut(limit)),
    }
}

/// Used when no back-end is configured; every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledInjector;

impl InputInjector for DisabledInjector {
    fn inject<'a>(&'a self, _agent_id: &'a str, _text: &'a str) -> InjectFuture<'a> {
        Box::pin(async { Err(InjectError::Unavailable) })
    }

    fn interrupt<'a>(&'a self, _agent_id: &'a str) -> InjectFuture<'a> {
        Box::pin(async { Err(InjectError::Unavailable) })
    }
}

/// Shells out to an external program:
///
/// - `<program> <args..> inject <agent_id>` with the text on stdin
/// - `<program> <args..> interrupt <agent_id>`
///
/// A non-zero exit status is a failure carrying the program's stderr.
#[derive(Debug, Clone)]
pub struct CommandInjector {
    program: String,
    args: Vec<String>,
}

impl CommandInjector {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a shell-style command line, e.g. `"python3 paste.py --fast"`.
    pub fn from_command_line(command_line: &str) -> Option<Self> {
        let mut parts = shlex::split(command_line)?.into_iter();
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    async fn run(
        &self,
        action: &str,
        agent_id: &str,
        stdin: Option<&str>,
    ) -> Result<(), InjectError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(action)
            .arg(agent_id)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|error| {
            InjectError::Failed(format!("failed to spawn {}: {error}", self.program))
        })?;

        if let (Some(text), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(text.as_bytes())
                .await
                .map_err(|error| InjectError::Failed(format!("failed writing stdin: {error}")))?;
            // Close stdin so the script sees EOF.
            drop(pipe);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|error| InjectError::Failed(error.to_string()))?;
        if output.status.success() {
            tracing::debug!(
                target = "mobile_relay::inject",
                agent_id = %agent_id,
                action,
                "injector command succeeded"
            );
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let detail = if stderr.is_empty() {
            format!("{} exited with {}", self.program, output.status)
        } else {
            stderr
        };
        tracing::warn!(
            target = "mobile_relay::inject",
            agent_id = %agent_id,
            action,
            error = %detail,
            "injector command failed"
        );
        Err(InjectError::Failed(detail))
    }
}

impl InputInjector for CommandInjector {
    fn inject<'a>(&'a self, agent_id: &'a str, text: &'a str) -> InjectFuture<'a> {
        Box::pin(self.run("inject", agent_id, Some(text)))
    }

    fn interrupt<'a>(&'a self, agent_id: &'a str) -> InjectFuture<'a> {
        Box::pin(self.run("interrupt", agent_id, None))
    }
}

/// Forwards requests to a local automation helper over HTTP:
/// `POST {base}/inject {agentId, text}` and `POST {base}/interrupt {agentId}`.
#[derive(Debug, Clone)]
pub struct HttpInjector {
    http: reqwest::Client,
    base_url: String,
}

impl HttpInjector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<(), InjectError> {
        let url = format!("{}/{}", self.base_url, path);
        let res = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|error| InjectError::Failed(error.to_string()))?;
        if res.status().is_success() {
            return Ok(());
        }
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        Err(InjectError::Failed(format!("{path} returned {status}: {body}")))
    }
}

impl InputInjector for HttpInjector {
    fn inject<'a>(&'a self, agent_id: &'a str, text: &'a str) -> InjectFuture<'a> {
        Box::pin(self.post("inject", json!({ "agentId": agent_id, "text": text })))
    }

    fn interrupt<'a>(&'a self, agent_id: &'a str) -> InjectFuture<'a> {
        Box::pin(self.post("interrupt", json!({ "agentId": agent_id })))
    }
}
