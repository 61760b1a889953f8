use std::ffi::OsString;
use std::fmt;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use wait_timeout::ChildExt;

/// Bytes of combined output kept for streamed runs.
pub const OUTPUT_TAIL_LIMIT: usize = 64 * 1024;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Structured command execution with timeouts, output capture and live streaming.
#[derive(Debug, Clone)]
pub struct ExecService {
    default_timeout: Duration,
}

impl ExecService {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    /// Run to completion and capture stdout/stderr separately.
    ///
    /// Both pipes are drained on helper threads while waiting, so chatty commands
    /// cannot fill a pipe and stall. A timeout kills the child and is an error.
    pub fn run(&self, request: ExecRequest) -> Result<ExecOutput, ExecError> {
        let mut cmd = request.command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
            program: request.display_program(),
            source,
        })?;

        let stdout_reader = child.stdout.take().map(read_all_on_thread);
        let stderr_reader = child.stderr.take().map(read_all_on_thread);

        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let status = if timeout.is_zero() {
            child.wait().map_err(ExecError::Wait)?
        } else {
            match child.wait_timeout(timeout).map_err(ExecError::Wait)? {
                Some(status) => status,
                None => {
                    kill_child(&mut child, request.process_group);
                    let _ = child.wait();
                    return Err(ExecError::TimedOut {
                        program: request.display_program(),
                        after: timeout,
                    });
                }
            }
        };

        let stdout = join_reader(stdout_reader);
        let stderr = join_reader(stderr_reader);

        Ok(ExecOutput {
            status,
            duration: started.elapsed(),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            timed_out: false,
        })
    }

    /// Run to completion while forwarding stdout and stderr to `sink` as they arrive.
    ///
    /// The combined output tail (at most `OUTPUT_TAIL_LIMIT` bytes) is returned in
    /// `ExecOutput::stdout`. A timeout kills the child (its whole process group when
    /// isolated) and is reported through `ExecOutput::timed_out`, not as an error.
    pub fn stream(&self, request: ExecRequest, sink: &mut dyn Write) -> Result<ExecOutput, ExecError> {
        let mut cmd = request.command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
            program: request.display_program(),
            source,
        })?;

        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let mut pumps: Vec<JoinHandle<()>> = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            pumps.push(pump_on_thread(out, tx.clone()));
        }
        if let Some(err) = child.stderr.take() {
            pumps.push(pump_on_thread(err, tx.clone()));
        }
        drop(tx);

        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let deadline = (!timeout.is_zero()).then(|| started + timeout);
        let mut tail = OutputTail::new(OUTPUT_TAIL_LIMIT);
        let mut timed_out = false;
        let mut pipes_open = true;

        // Stop when the child exits, not when the pipes close: a background process it
        // left behind may hold them open indefinitely.
        let mut exited: Option<(ExitStatus, Duration)> = None;
        loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(chunk) => {
                    // A broken sink must not stop us from draining the child.
                    let _ = sink.write_all(&chunk);
                    tail.push(&chunk);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    pipes_open = false;
                    break;
                }
            }
            if let Some(status) = child.try_wait().map_err(ExecError::Wait)? {
                exited = Some((status, started.elapsed()));
                break;
            }
            if let Some(deadline) = deadline {
                if !timed_out && Instant::now() >= deadline {
                    tracing::warn!(
                        program = %request.display_program(),
                        "command timed out after {:?}; killing",
                        timeout
                    );
                    kill_child(&mut child, request.process_group);
                    timed_out = true;
                }
            }
        }

        let (status, duration) = match exited {
            Some(done) => {
                // Output written just before exit may still be in flight.
                let grace_until = Instant::now() + EXIT_DRAIN_GRACE;
                while pipes_open {
                    let left = grace_until.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        break;
                    }
                    match rx.recv_timeout(left.min(POLL_INTERVAL)) {
                        Ok(chunk) => {
                            let _ = sink.write_all(&chunk);
                            tail.push(&chunk);
                        }
                        Err(RecvTimeoutError::Timeout) => break,
                        Err(RecvTimeoutError::Disconnected) => pipes_open = false,
                    }
                }
                done
            }
            None => {
                let status = child.wait().map_err(ExecError::Wait)?;
                (status, started.elapsed())
            }
        };
        let _ = sink.flush();

        if pipes_open {
            tracing::debug!(
                program = %request.display_program(),
                "command exited with its output still held open by leftover processes"
            );
            if request.process_group {
                kill_group(child.id());
            }
            // Pumps finish on their own once the last writer goes away.
            drop(pumps);
        } else {
            for pump in pumps {
                let _ = pump.join();
            }
        }

        Ok(ExecOutput {
            status,
            duration,
            stdout: tail.into_string(),
            stderr: String::new(),
            timed_out,
        })
    }
}

impl Default for ExecService {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

fn read_all_on_thread(mut reader: impl Read + Send + 'static) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

fn join_reader(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

fn pump_on_thread(mut reader: impl Read + Send + 'static, tx: mpsc::Sender<Vec<u8>>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    })
}

#[cfg(unix)]
fn kill_child(child: &mut Child, process_group: bool) {
    // The child leads its own group; take grandchildren down with it.
    if process_group && kill_group(child.id()) {
        return;
    }
    let _ = child.kill();
}

#[cfg(not(unix))]
fn kill_child(child: &mut Child, _process_group: bool) {
    let _ = child.kill();
}

#[cfg(unix)]
fn kill_group(leader: u32) -> bool {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;
    killpg(Pid::from_raw(leader as i32), Signal::SIGKILL).is_ok()
}

#[cfg(not(unix))]
fn kill_group(_leader: u32) -> bool {
    false
}

/// Ring-ish buffer keeping only the newest `limit` bytes.
struct OutputTail {
    buf: Vec<u8>,
    limit: usize,
}

impl OutputTail {
    fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
        if self.buf.len() > self.limit {
            let excess = self.buf.len() - self.limit;
            self.buf.drain(..excess);
        }
    }

    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}

#[derive(Debug)]
pub struct ExecRequest {
    program: OsString,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    env: Vec<(OsString, OsString)>,
    timeout: Option<Duration>,
    process_group: bool,
}

impl ExecRequest {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout: None,
            process_group: false,
        }
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

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Spawn the child as the leader of a new process group, so a terminal
    /// interrupt aimed at us does not reach it.
    pub fn isolate_process_group(mut self, isolate: bool) -> Self {
        self.process_group = isolate;
        self
    }

    /// Program and arguments rendered shell-style, for logs and error messages.
    pub fn display(&self) -> String {
        let mut words = vec![self.display_program()];
        words.extend(self.args.iter().map(|a| a.to_string_lossy().into_owned()));
        crate::util::shell_join(&words)
    }

    fn display_program(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            if self.process_group {
                cmd.process_group(0);
            }
        }
        tracing::debug!(command = %self.display(), cwd = ?self.cwd, "spawning");
        cmd
    }
}

#[derive(Debug)]
pub struct ExecOutput {
    pub status: ExitStatus,
    pub duration: Duration,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

#[derive(Debug)]
pub enum ExecError {
    Spawn { program: String, source: io::Error },
    Wait(io::Error),
    TimedOut { program: String, after: Duration },
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecError::Spawn { program, source } => write!(f, "failed to spawn {program}: {source}"),
            ExecError::Wait(e) => write!(f, "failed to wait for process: {e}"),
            ExecError::TimedOut { program, after } => {
                write!(f, "{program} timed out after {}", humantime::format_duration(*after))
            }
        }
    }
}

impl std::error::Error for ExecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExecError::Spawn { source, .. } => Some(source),
            ExecError::Wait(e) => Some(e),
            ExecError::TimedOut { .. } => None,
        }
    }
}

impl ExecError {
    /// Convert into an io::Error, preserving NotFound so exit-code mapping still works.
    pub fn into_io(self) -> io::Error {
        match self {
            ExecError::Spawn { source, .. } => source,
            ExecError::Wait(e) => e,
            other @ ExecError::TimedOut { .. } => io::Error::new(io::ErrorKind::TimedOut, other.to_string()),
        }
    }
}
