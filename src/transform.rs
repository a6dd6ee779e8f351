//! External transform commands.
//!
//! A [`TransformSpec`] is an argument vector with one typed slot for the
//! file being processed. The slot is an [`Arg::Path`] value rather than a
//! sentinel string, so a real file whose path happens to read `{file}` is
//! passed through untouched.
//!
//! Configuration files spell the slot as the literal token [`FILE_TOKEN`];
//! [`TransformSpec::parse`] turns that token into the typed slot once, at load
//! time, and also expands [`TOOLS_TOKEN`] to the configured tools directory.

use std::ffi::OsString;
use std::fmt;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Token standing for the processed file in configured command lines.
pub const FILE_TOKEN: &str = "{file}";
/// Token expanded to the tools directory (where bundled jars live).
pub const TOOLS_TOKEN: &str = "{tools}";

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const KILL_GRACE: Duration = Duration::from_millis(200);

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("command is empty")]
    Empty,
    #[error("command must contain exactly one {FILE_TOKEN} argument, found {0}")]
    Placeholder(usize),
    #[error("failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("IO error while running '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// One argument of a transform command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Literal(String),
    /// Replaced by the processed file's path on each invocation.
    Path,
}

/// An external command applied to one file at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformSpec {
    program: String,
    args: Vec<Arg>,
}

/// Outcome of a single invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessResult {
    /// Exit status zero; carries everything the tool wrote to stdout.
    Success(Vec<u8>),
    /// Non-zero exit. `code` is `None` when the tool was killed by a signal.
    Failure { code: Option<i32>, stderr: Vec<u8> },
    /// The tool ran past the configured timeout and was killed.
    TimedOut { after: Duration, stderr: Vec<u8> },
}

impl TransformSpec {
    /// Build a spec from already-typed arguments.
    pub fn new(program: impl Into<String>, args: Vec<Arg>) -> Result<Self, TransformError> {
        let program = program.into();
        if program.is_empty() {
            return Err(TransformError::Empty);
        }
        let slots = args.iter().filter(|a| matches!(a, Arg::Path)).count();
        if slots != 1 {
            return Err(TransformError::Placeholder(slots));
        }
        Ok(Self { program, args })
    }

    /// Parse a configured command line such as `["gzip", "-c", "{file}"]`.
    ///
    /// Arguments equal to [`FILE_TOKEN`] become the path slot. Occurrences of
    /// [`TOOLS_TOKEN`] in the program or any literal argument are replaced
    /// with `tools_dir`.
    pub fn parse<S: AsRef<str>>(command: &[S], tools_dir: &Path) -> Result<Self, TransformError> {
        let (program, rest) = command.split_first().ok_or(TransformError::Empty)?;
        let tools = tools_dir.to_string_lossy();
        let expand = |s: &str| s.replace(TOOLS_TOKEN, &tools);

        let args = rest
            .iter()
            .map(|a| match a.as_ref() {
                FILE_TOKEN => Arg::Path,
                other => Arg::Literal(expand(other)),
            })
            .collect();
        Self::new(expand(program.as_ref()), args)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    /// Concrete argument vector (without the program) for one file.
    pub fn argv(&self, path: &Path) -> Vec<OsString> {
        self.args
            .iter()
            .map(|a| match a {
                Arg::Literal(s) => OsString::from(s),
                Arg::Path => path.as_os_str().to_os_string(),
            })
            .collect()
    }

    /// Full command line for one file, program first, for display.
    pub fn command_line(&self, path: &Path) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.argv(path).iter().map(|a| a.to_string_lossy().into_owned()))
            .collect()
    }

    /// Run the command on `path`, blocking until it exits.
    ///
    /// A tool that runs but fails is an `Ok(ProcessResult::Failure)`; only a
    /// tool that cannot be started (or whose pipes break) is an `Err`.
    pub fn run(&self, path: &Path, timeout: Option<Duration>) -> Result<ProcessResult, TransformError> {
        tracing::debug!(program = %self.program, file = %path.display(), "spawning transform");
        let mut cmd = Command::new(&self.program);
        cmd.args(self.argv(path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        match timeout {
            None => {
                let output = cmd.output().map_err(|source| self.spawn_error(source))?;
                Ok(classify(output.status, output.stdout, output.stderr))
            }
            Some(limit) => self.run_with_timeout(cmd, limit),
        }
    }

    fn run_with_timeout(&self, mut cmd: Command, limit: Duration) -> Result<ProcessResult, TransformError> {
        // Own process group, so a timeout also reaches whatever the tool spawned.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let mut child = cmd.spawn().map_err(|source| self.spawn_error(source))?;
        let io_err = |source| TransformError::Io {
            program: self.program.clone(),
            source,
        };

        // Drain both pipes on their own threads so a chatty tool can't block
        // on a full pipe while we poll for exit.
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io_err(io::Error::other("stdout not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io_err(io::Error::other("stderr not captured")))?;
        let stdout_reader = thread::spawn(move || drain(stdout));
        let stderr_reader = thread::spawn(move || drain(stderr));

        let started = Instant::now();
        loop {
            if let Some(status) = child.try_wait().map_err(io_err)? {
                let out = join_reader(stdout_reader).map_err(io_err)?;
                let err = join_reader(stderr_reader).map_err(io_err)?;
                return Ok(classify(status, out, err));
            }
            if started.elapsed() >= limit {
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }

        tracing::debug!(program = %self.program, after = ?limit, "killing timed out transform");
        child.kill().map_err(io_err)?;
        kill_group(child.id());
        child.wait().map_err(io_err)?;

        // A descendant that escaped the group kill may still hold the pipes
        // open. Give the readers a short grace period, then leave them behind.
        let grace = Instant::now();
        while !stderr_reader.is_finished() && grace.elapsed() < KILL_GRACE {
            thread::sleep(POLL_INTERVAL);
        }
        let stderr = if stderr_reader.is_finished() {
            join_reader(stderr_reader).unwrap_or_default()
        } else {
            Vec::new()
        };
        drop(stdout_reader);

        Ok(ProcessResult::TimedOut {
            after: limit,
            stderr,
        })
    }

    fn spawn_error(&self, source: io::Error) -> TransformError {
        TransformError::Spawn {
            program: self.program.clone(),
            source,
        }
    }
}

impl fmt::Display for TransformSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            match arg {
                Arg::Literal(s) => write!(f, " {s}")?,
                Arg::Path => write!(f, " {FILE_TOKEN}")?,
            }
        }
        Ok(())
    }
}

fn classify(status: ExitStatus, stdout: Vec<u8>, stderr: Vec<u8>) -> ProcessResult {
    if status.success() {
        ProcessResult::Success(stdout)
    } else {
        ProcessResult::Failure {
            code: status.code(),
            stderr,
        }
    }
}

/// SIGKILL the process group led by `pid`. Best effort: the leader itself has
/// already been killed through [`std::process::Child::kill`].
#[cfg(unix)]
fn kill_group(pid: u32) {
    let _ = Command::new("kill")
        .args(["-9", &format!("-{pid}")])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

fn drain(mut pipe: impl Read) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    pipe.read_to_end(&mut buf)?;
    Ok(buf)
}

fn join_reader(handle: thread::JoinHandle<io::Result<Vec<u8>>>) -> io::Result<Vec<u8>> {
    handle
        .join()
        .map_err(|_| io::Error::other("pipe reader thread panicked"))?
}
