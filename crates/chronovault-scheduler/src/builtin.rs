//! Stock durable workloads, registered by [`crate::Codecs::with_builtins`].

use std::collections::BTreeMap;
use std::process::Output as ProcessOutput;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::codec::{Durable, Tagged};
use crate::context::TaskContext;
use crate::failure::Failure;
use crate::workload::{Output, Workload};

/// Logs a message and returns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogMessage {
    pub message: String,
}

impl LogMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl Tagged for LogMessage {
    const TAG: &'static str = "chronovault.log";
}

impl Workload for LogMessage {
    fn call(&self, ctx: &TaskContext) -> Result<Output, Failure> {
        tracing::info!("📢 [{}#{}] {}", ctx.name(), ctx.task_id(), self.message);
        Ok(Output::of(self.message.clone()))
    }

    fn durable(&self) -> Option<&dyn Durable> {
        Some(self)
    }
}

/// Runs an external program. A non-zero exit status fails the attempt.
///
/// The program is killed once `timeout_secs` or the attempt's transaction
/// timeout elapses, whichever comes first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// What a successful [`RunCommand`] returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
}

impl RunCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), args: Vec::new(), env: BTreeMap::new(), timeout_secs: None }
    }

    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Split a shell-like command line on whitespace.
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let program = words.next()?;
        Some(Self { args: words.map(String::from).collect(), ..Self::new(program) })
    }

    async fn run(&self, limit: Option<Duration>) -> Result<ProcessOutput, Failure> {
        let output = Command::new(&self.program).args(&self.args).envs(&self.env).kill_on_drop(true).output();
        match limit {
            None => Ok(output.await?),
            Some(limit) => match tokio::time::timeout(limit, output).await {
                Ok(result) => Ok(result?),
                Err(_) => Err(Failure::new(
                    "CommandTimedOut",
                    format!("{} killed after {}s", self.program, limit.as_secs_f64()),
                )),
            },
        }
    }
}

impl Tagged for RunCommand {
    const TAG: &'static str = "chronovault.command";
}

impl Workload for RunCommand {
    fn call(&self, ctx: &TaskContext) -> Result<Output, Failure> {
        tracing::debug!("Task {} running {} {:?}", ctx.task_id(), self.program, self.args);
        let limit = match (self.timeout_secs.map(Duration::from_secs), ctx.transaction().remaining()) {
            (Some(own), Some(left)) => Some(own.min(left)),
            (own, left) => own.or(left),
        };
        let output = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle.block_on(self.run(limit))?,
            Err(_) => tokio::runtime::Builder::new_current_thread().enable_all().build()?.block_on(self.run(limit))?,
        };
        let status = output.status.code().unwrap_or(-1);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(Failure::new("CommandFailed", format!("{} exited with {status}: {stderr}", self.program))
                .with_detail(status));
        }
        Ok(Output::of(CommandOutput { status, stdout: String::from_utf8_lossy(&output.stdout).into_owned() }))
    }

    fn durable(&self) -> Option<&dyn Durable> {
        Some(self)
    }
}
