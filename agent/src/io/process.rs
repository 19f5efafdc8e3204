//! Single command-runner used by git, the PR tool and the agent.
//!
//! Children run with a timeout and bounded output capture. Output is drained
//! on reader threads so a chatty child can never deadlock on a full pipe, and
//! can optionally be mirrored line by line to our own stdout/stderr.
//!
//! On unix each child leads its own process group. Once the child has exited
//! (or been killed on timeout) the whole group is killed, so background
//! processes it left behind cannot hold the output pipes open.

use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

const DEFAULT_OUTPUT_LIMIT: usize = 1_000_000;

/// How long output readers may keep running after the child is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Human form of a timeout: whole seconds as `Ns`, anything finer as `Nms`.
pub fn describe_timeout(timeout: Duration) -> String {
    if timeout.subsec_millis() == 0 {
        format!("{}s", timeout.as_secs())
    } else {
        format!("{}ms", timeout.as_millis())
    }
}

/// Description of one child process invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: OsString,
    args: Vec<OsString>,
    workdir: Option<PathBuf>,
    env: Vec<(String, String)>,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
    output_limit: usize,
    passthrough: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<OsString>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            workdir: None,
            env: Vec::new(),
            stdin: None,
            timeout,
            output_limit: DEFAULT_OUTPUT_LIMIT,
            passthrough: false,
        }
    }

    /// Build from a configured argv such as `["gh", "pr", "create"]`.
    pub fn from_argv(argv: &[String], timeout: Duration) -> Result<Self> {
        let Some((program, args)) = argv.split_first() else {
            bail!("command must not be empty");
        };
        Ok(Self::new(program, timeout).args(args))
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn workdir(mut self, dir: impl AsRef<Path>) -> Self {
        self.workdir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn output_limit(mut self, bytes: usize) -> Self {
        self.output_limit = bytes;
        self
    }

    /// Mirror child stdout/stderr to ours while still capturing it.
    pub fn passthrough(mut self, on: bool) -> Self {
        self.passthrough = on;
        self
    }

    pub fn program(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd
    }
}

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Uniform result of one workflow step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

impl CommandResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    /// Map a finished child to a step result.
    ///
    /// A non-zero exit reports trimmed stderr, or the exit code when stderr is
    /// empty. Timeouts must be handled by the caller before this point if it
    /// wants a caller-specific message.
    pub fn from_output(output: &CommandOutput) -> Self {
        let stdout = output.stdout_text();
        if output.timed_out {
            return Self {
                success: false,
                output: stdout,
                error: Some("Process timed out".to_string()),
            };
        }
        if output.status.success() {
            return Self::ok(stdout);
        }
        let stderr = output.stderr_text();
        let stderr = stderr.trim();
        let error = if !stderr.is_empty() {
            stderr.to_string()
        } else {
            match output.status.code() {
                Some(code) => format!("Process exited with code {code}"),
                None => "Process terminated by signal".to_string(),
            }
        };
        Self {
            success: false,
            output: stdout,
            error: Some(error),
        }
    }

    pub fn error_text(&self) -> &str {
        self.error.as_deref().unwrap_or_default()
    }
}

/// Run a step and fold every failure (spawn, timeout, exit) into the result.
pub fn run_step(spec: &CommandSpec) -> CommandResult {
    match run_command(spec) {
        Ok(output) if output.timed_out => CommandResult {
            success: false,
            output: output.stdout_text(),
            error: Some(format!(
                "{} timed out after {}",
                spec.program(),
                describe_timeout(spec.timeout)
            )),
        },
        Ok(output) => CommandResult::from_output(&output),
        Err(err) => CommandResult::failed(format!("{err:#}")),
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// `output_limit` bounds the amount of stdout/stderr stored in memory; bytes beyond it are
/// discarded while still draining (and, with passthrough, still mirrored).
#[instrument(skip_all, fields(program = %spec.program(), timeout_secs = spec.timeout.as_secs()))]
pub fn run_command(spec: &CommandSpec) -> Result<CommandOutput> {
    let mut cmd = spec.to_command();
    if spec.stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).with_context(|| format!("spawn {}", spec.program()));
        }
    };

    let stdin_handle = match &spec.stdin {
        Some(input) => {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            let input = input.clone();
            // Dropping the handle at the end of the thread closes the pipe.
            Some(thread::spawn(move || {
                if let Err(e) = child_stdin.write_all(&input) {
                    warn!(err = %e, "failed to write child stdin");
                }
            }))
        }
        None => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let limit = spec.output_limit;
    let (out_tee, err_tee) = if spec.passthrough {
        (Some(Tee::Stdout), Some(Tee::Stderr))
    } else {
        (None, None)
    };
    let (tx, rx) = mpsc::channel();
    spawn_reader(Stream::Stdout, stdout, limit, out_tee, tx.clone());
    spawn_reader(Stream::Stderr, stderr, limit, err_tee, tx);

    let mut timed_out = false;
    let status = match child.wait_timeout(spec.timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = spec.timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            #[cfg(unix)]
            kill_process_group(child.id());
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };
    // Leftover background processes would keep the pipes open.
    #[cfg(unix)]
    kill_process_group(child.id());

    if let Some(handle) = stdin_handle {
        if handle.is_finished() {
            if handle.join().is_err() {
                warn!("stdin writer thread panicked");
            }
        } else {
            warn!("child exited without draining stdin");
        }
    }
    let captured = collect_output(&rx, DRAIN_GRACE)?;
    let (stdout, stdout_truncated) = captured.stdout;
    let (stderr, stderr_truncated) = captured.stderr;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// SIGKILL every process in the group led by `pid`. A group that is already
/// empty is fine.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => warn!(err = %err, pid, "failed to kill process group"),
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

type Captured = (Vec<u8>, usize);

fn spawn_reader<R: Read + Send + 'static>(
    stream: Stream,
    reader: R,
    limit: usize,
    tee: Option<Tee>,
    tx: Sender<(Stream, Result<Captured>)>,
) {
    thread::spawn(move || {
        let result = read_stream_limited(reader, limit, tee);
        // The receiver is gone only if the run already gave up on us.
        let _ = tx.send((stream, result));
    });
}

#[derive(Debug, Default)]
struct CapturedOutput {
    stdout: Captured,
    stderr: Captured,
}

/// Wait for both readers, but no longer than `grace`.
///
/// A stream whose reader is still blocked (its pipe held open by a process
/// outside our group) is returned as whatever was captured: nothing.
fn collect_output(
    rx: &Receiver<(Stream, Result<Captured>)>,
    grace: Duration,
) -> Result<CapturedOutput> {
    let deadline = Instant::now() + grace;
    let mut stdout = None;
    let mut stderr = None;
    while stdout.is_none() || stderr.is_none() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok((Stream::Stdout, result)) => stdout = Some(result.context("read stdout")?),
            Ok((Stream::Stderr, result)) => stderr = Some(result.context("read stderr")?),
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    grace_secs = grace.as_secs(),
                    "output pipes still open after exit, abandoning readers"
                );
                break;
            }
            Err(RecvTimeoutError::Disconnected) => bail!("output reader thread panicked"),
        }
    }
    Ok(CapturedOutput {
        stdout: stdout.unwrap_or_default(),
        stderr: stderr.unwrap_or_default(),
    })
}

#[derive(Debug, Clone, Copy)]
enum Tee {
    Stdout,
    Stderr,
}

impl Tee {
    fn write_line(self, line: &[u8]) {
        let written = match self {
            Tee::Stdout => {
                let mut out = std::io::stdout().lock();
                out.write_all(line).and_then(|()| out.flush())
            }
            Tee::Stderr => {
                let mut out = std::io::stderr().lock();
                out.write_all(line).and_then(|()| out.flush())
            }
        };
        if let Err(e) = written {
            warn!(err = %e, "failed to mirror child output");
        }
    }
}

/// Read a stream line by line with a size limit, optionally mirroring each line.
fn read_stream_limited<R: Read>(
    reader: R,
    limit: usize,
    tee: Option<Tee>,
) -> Result<(Vec<u8>, usize)> {
    let mut buf_reader = BufReader::new(reader);
    let mut collected = Vec::new();
    let mut truncated = 0usize;

    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read line")?;
        if n == 0 {
            break;
        }

        if let Some(tee) = tee {
            tee.write_line(&line);
        }

        let remaining = limit.saturating_sub(collected.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            collected.extend_from_slice(&line[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((collected, truncated))
}
