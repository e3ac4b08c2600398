//! Local process execution with streamed stdio.
//!
//! Spawning a command yields two handles. The outward one is a
//! [`ProcessOutput`] supplied by the caller: it receives `stdout`/`stderr`
//! chunks in arrival order and then exactly one `complete`. The inward one
//! is the returned [`ProcessHandle`]: it feeds stdin and cancels.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ExecutorError;

const READ_CHUNK: usize = 8 * 1024;

/// Receiver of a process's output.
///
/// `complete` is called exactly once, after every output chunk.
#[async_trait]
pub trait ProcessOutput: Send + Sync {
    async fn stdout(&self, chunk: Vec<u8>);
    async fn stderr(&self, chunk: Vec<u8>);
    async fn complete(&self, exit_code: i32);
}

/// A command line to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Build from an argv vector. `None` if it is empty.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone()).args(args.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

/// Controller side of a running command.
pub struct ProcessHandle {
    pid: Option<u32>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    cancel: CancellationToken,
    task: JoinHandle<i32>,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Write to the process's stdin.
    pub async fn stdin(&self, chunk: &[u8]) -> Result<(), ExecutorError> {
        let mut stdin = self.stdin.lock().await;
        let pipe = stdin.as_mut().ok_or(ExecutorError::StdinClosed)?;
        pipe.write_all(chunk).await?;
        Ok(())
    }

    /// Close stdin so the process sees end of input.
    pub async fn close_stdin(&self) {
        self.stdin.lock().await.take();
    }

    /// Ask for the process to be killed. Termination is observed through
    /// the eventual `complete` call. Repeated calls are no-ops.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            debug!(pid = ?self.pid, "Cancelling process");
            self.cancel.cancel();
        }
    }

    /// Wait for the process to exit and its output to be delivered.
    pub async fn wait(self) -> Result<i32, ExecutorError> {
        self.task
            .await
            .map_err(|e| ExecutorError::Supervisor(e.to_string()))
    }
}

/// Spawn `spec`, streaming its output into `output`.
///
/// The process is killed when `cancel` fires. `output.complete` is called
/// once both output streams reached end of file and the process exited.
pub fn spawn(
    spec: &CommandSpec,
    output: Arc<dyn ProcessOutput>,
    cancel: CancellationToken,
) -> Result<ProcessHandle, ExecutorError> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }

    debug!(program = %spec.program, args = ?spec.args, "Spawning process");
    let mut child = cmd.spawn().map_err(|source| ExecutorError::Spawn {
        program: spec.program.clone(),
        source,
    })?;
    let pid = child.id();

    let stdin = child.stdin.take();
    let stdout = child.stdout.take().ok_or(ExecutorError::MissingPipe("stdout"))?;
    let stderr = child.stderr.take().ok_or(ExecutorError::MissingPipe("stderr"))?;

    let program = spec.program.clone();
    let token = cancel.clone();
    let task = tokio::spawn(async move {
        let out_reader = tokio::spawn(forward(stdout, output.clone(), Stream::Stdout));
        let err_reader = tokio::spawn(forward(stderr, output.clone(), Stream::Stderr));

        let status = tokio::select! {
            status = child.wait() => status,
            _ = token.cancelled() => {
                if let Err(e) = child.start_kill() {
                    warn!(program = %program, error = %e, "Failed to kill process");
                }
                child.wait().await
            }
        };

        // Deliver every byte before completing.
        let _ = out_reader.await;
        let _ = err_reader.await;

        let exit_code = match status {
            Ok(status) => exit_code(status),
            Err(e) => {
                warn!(program = %program, error = %e, "Failed to wait for process");
                -1
            }
        };
        info!(program = %program, pid = ?pid, exit_code, "Process exited");
        output.complete(exit_code).await;
        exit_code
    });

    Ok(ProcessHandle {
        pid,
        stdin: tokio::sync::Mutex::new(stdin),
        cancel,
        task,
    })
}

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

async fn forward<R>(mut reader: R, output: Arc<dyn ProcessOutput>, stream: Stream)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = buf[..n].to_vec();
                match stream {
                    Stream::Stdout => output.stdout(chunk).await,
                    Stream::Stderr => output.stderr(chunk).await,
                }
            }
            Err(e) => {
                warn!(error = %e, "Error reading process output");
                break;
            }
        }
    }
}

/// Exit code, or 128 + signal number for a process killed by a signal.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[derive(Default)]
struct Captured {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// A [`ProcessOutput`] that keeps everything in memory.
pub struct CapturedOutput {
    captured: Mutex<Captured>,
    exit: watch::Sender<Option<i32>>,
}

impl CapturedOutput {
    pub fn new() -> Arc<Self> {
        let (exit, _) = watch::channel(None);
        Arc::new(Self {
            captured: Mutex::new(Captured::default()),
            exit,
        })
    }

    pub fn stdout_bytes(&self) -> Vec<u8> {
        self.captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stdout
            .clone()
    }

    pub fn stderr_bytes(&self) -> Vec<u8> {
        self.captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stderr
            .clone()
    }

    pub fn exit_code(&self) -> Option<i32> {
        *self.exit.borrow()
    }

    /// Wait for `complete`.
    pub async fn wait(&self) -> i32 {
        let mut rx = self.exit.subscribe();
        let code = match rx.wait_for(Option::is_some).await {
            Ok(code) => code.unwrap_or(-1),
            Err(_) => -1,
        };
        code
    }

    fn accepting(&self) -> bool {
        if self.exit.borrow().is_some() {
            warn!("Process output after completion ignored");
            return false;
        }
        true
    }
}

#[async_trait]
impl ProcessOutput for CapturedOutput {
    async fn stdout(&self, chunk: Vec<u8>) {
        if self.accepting() {
            self.captured
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .stdout
                .extend_from_slice(&chunk);
        }
    }

    async fn stderr(&self, chunk: Vec<u8>) {
        if self.accepting() {
            self.captured
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .stderr
                .extend_from_slice(&chunk);
        }
    }

    async fn complete(&self, exit_code: i32) {
        let first = self.exit.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(exit_code);
            true
        });
        if !first {
            warn!(exit_code, "Duplicate process completion ignored");
        }
    }
}

/// Run `spec` to completion and capture its output.
pub async fn run_captured(
    spec: &CommandSpec,
    cancel: CancellationToken,
) -> Result<(i32, Arc<CapturedOutput>), ExecutorError> {
    let output = CapturedOutput::new();
    let handle = spawn(spec, output.clone(), cancel)?;
    handle.close_stdin().await;
    let code = handle.wait().await?;
    Ok((code, output))
}
