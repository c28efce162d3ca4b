//! Subprocess execution for the external tools we drive (juju, docker, chown).
//!
//! Commands are always built as discrete argument lists; the only string that
//! ever reaches a shell is the explicitly quoted `sh -c` payload handed to the
//! container. A plain whitespace-delimited string is still accepted as a
//! shorthand for fixed command lines without user input.

use std::fmt;
use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitStatus, Stdio};

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// A single external command: program, arguments and extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
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

    /// Set an environment variable for the child only.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Run this invocation through another program, e.g. `sudo`.
    pub fn wrapped_in(self, program: impl Into<String>) -> Self {
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(self.program);
        args.extend(self.args);
        Self {
            program: program.into(),
            args,
            env: self.env,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn argv(&self) -> &[String] {
        &self.args
    }

    pub fn envs(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn to_command(&self) -> Command {
        let mut c = Command::new(&self.program);
        c.args(&self.args);
        c.envs(self.env.iter().map(|(k, v)| (k, v)));
        c
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words = std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str));
        match shlex::try_join(words.clone()) {
            Ok(s) => f.write_str(&s),
            // Embedded NUL, which the kernel would reject anyway
            Err(_) => f.write_str(&words.collect::<Vec<_>>().join(" ")),
        }
    }
}

impl From<&str> for Invocation {
    /// Split a fixed command line on whitespace. No quoting is honored.
    fn from(s: &str) -> Self {
        let mut words = s.split_whitespace();
        let program = words.next().unwrap_or_default();
        Invocation::new(program).args(words)
    }
}

impl From<Vec<String>> for Invocation {
    fn from(v: Vec<String>) -> Self {
        let mut words = v.into_iter();
        let program = words.next().unwrap_or_default();
        Invocation::new(program).args(words)
    }
}

impl<const N: usize> From<[&str; N]> for Invocation {
    fn from(v: [&str; N]) -> Self {
        let mut words = v.into_iter();
        let program = words.next().unwrap_or_default();
        Invocation::new(program).args(words)
    }
}

/// Map a finished child to `Ok` or a [`Error::Process`].
fn check_status(invocation: &Invocation, status: ExitStatus, stderr: String) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    let code = status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(1);
    Err(Error::Process {
        code,
        command: invocation.to_string(),
        stderr: stderr.trim_end().to_owned(),
    })
}

/// Execute a command, streaming its standard output to our stdout.
///
/// When `verbose`, the invocation is echoed once before it runs and each
/// line of output is printed as it arrives. Standard error is passed
/// through to our stderr and also captured for the returned error.
pub fn run_command(invocation: &Invocation, verbose: bool) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run_streaming(invocation, verbose, &mut out)
}

fn echo(invocation: &Invocation, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "Executing: {invocation}").map_err(Error::io("writing command output"))?;
    out.flush().map_err(Error::io("writing command output"))
}

fn forward_lines(
    stdout: impl Read,
    invocation: &Invocation,
    verbose: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .map_err(Error::io(format!("reading output of {}", invocation.program())))?;
        if n == 0 {
            return Ok(());
        }
        if verbose {
            let line = String::from_utf8_lossy(&buf);
            writeln!(out, "{}", line.trim_end_matches('\n'))
                .map_err(Error::io("writing command output"))?;
            out.flush().map_err(Error::io("writing command output"))?;
        }
    }
}

pub(crate) fn run_streaming(
    invocation: &Invocation,
    verbose: bool,
    out: &mut dyn Write,
) -> Result<()> {
    if verbose {
        echo(invocation, out)?;
    }
    debug!("Spawning {invocation}");

    let mut child = invocation
        .to_command()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(Error::io(format!("spawning {}", invocation.program())))?;

    let stderr = child.stderr.take();
    let stderr_reader = std::thread::spawn(move || {
        let mut captured = String::new();
        let Some(stderr) = stderr else {
            return captured;
        };
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let _ = std::io::stderr().write_all(&buf);
                    captured.push_str(&String::from_utf8_lossy(&buf));
                }
            }
        }
        captured
    });

    let forwarded = match child.stdout.take() {
        Some(stdout) => forward_lines(stdout, invocation, verbose, out),
        None => Ok(()),
    };
    if let Err(e) = forwarded {
        // Reap the child before returning
        warn!("Stopping {}: {e}", invocation.program());
        let _ = child.kill();
        let _ = child.wait();
        let _ = stderr_reader.join();
        return Err(e);
    }

    let status = child
        .wait()
        .map_err(Error::io(format!("waiting for {}", invocation.program())))?;
    let stderr = stderr_reader.join().unwrap_or_default();
    check_status(invocation, status, stderr)
}

/// Execute a command without streaming and return its standard output.
///
/// When `verbose`, the invocation is echoed once before it runs.
pub fn output(invocation: &Invocation, verbose: bool) -> Result<String> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run_captured(invocation, verbose, &mut out)
}

pub(crate) fn run_captured(
    invocation: &Invocation,
    verbose: bool,
    out: &mut dyn Write,
) -> Result<String> {
    if verbose {
        echo(invocation, out)?;
    }
    debug!("Running {invocation}");
    let output = invocation
        .to_command()
        .stdin(Stdio::null())
        .output()
        .map_err(Error::io(format!("spawning {}", invocation.program())))?;
    check_status(
        invocation,
        output.status,
        String::from_utf8_lossy(&output.stderr).into_owned(),
    )?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// The seam between the workflows and the host.
pub trait Exec {
    /// Run to completion, streaming output.
    fn exec(&self, invocation: &Invocation) -> Result<()>;

    /// Run to completion and return standard output instead of streaming it.
    fn capture(&self, invocation: &Invocation) -> Result<String>;
}

/// Runs commands on the invoking machine.
#[derive(Debug, Clone, Copy)]
pub struct HostExec {
    pub verbose: bool,
}

impl Default for HostExec {
    fn default() -> Self {
        Self { verbose: true }
    }
}

impl Exec for HostExec {
    fn exec(&self, invocation: &Invocation) -> Result<()> {
        run_command(invocation, self.verbose)
    }

    fn capture(&self, invocation: &Invocation) -> Result<String> {
        output(invocation, self.verbose)
    }
}
