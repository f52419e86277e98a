use crate::{Error, Result};
use std::{
    io::Write,
    process::{Command, Output, Stdio},
};

/// Captured result of one host tool invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CmdOutput {
    pub success: bool,
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn ok(stdout: &str) -> CmdOutput {
        CmdOutput {
            success: true,
            code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: &str) -> CmdOutput {
        CmdOutput {
            success: false,
            code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    fn from_output(out: Output) -> Result<CmdOutput> {
        Ok(CmdOutput {
            success: out.status.success(),
            code: out.status.code().unwrap_or(-1),
            stdout: String::from_utf8(out.stdout).map_err(Error::UTF8)?,
            stderr: String::from_utf8(out.stderr).map_err(Error::UTF8)?,
        })
    }

    /// Native error text of a failed invocation, for wrapping in our error kinds.
    pub fn failure_text(&self, tool: &str) -> String {
        let err = self.stderr.trim();
        if err.is_empty() {
            format!("{tool} exited with code {}", self.code)
        } else {
            format!("{tool}: {err}")
        }
    }
}

/// Seam over host tool invocation (docker, kind, minikube, ...).
/// The deploy flow only ever reaches external tools through this trait so
/// tests can script every answer without a container runtime on the host.
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CmdOutput>;
    fn run_with_stdin(&self, program: &str, args: &[&str], input: &str) -> Result<CmdOutput>;
}

/// Real runner, executing on the host.
#[derive(Clone, Debug, Default)]
pub struct HostRunner;

impl CommandRunner for HostRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CmdOutput> {
        tracing::debug!("run: {} {}", program, args.join(" "));
        let out = Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(Error::Stdio)?;
        CmdOutput::from_output(out)
    }

    fn run_with_stdin(&self, program: &str, args: &[&str], input: &str) -> Result<CmdOutput> {
        tracing::debug!("run (with stdin): {} {}", program, args.join(" "));
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(Error::Stdio)?;
        child
            .stdin
            .take()
            .ok_or_else(|| Error::Other(format!("no stdin handle for {program}")))?
            .write_all(input.as_bytes())
            .map_err(Error::Stdio)?;
        let out = child.wait_with_output().map_err(Error::Stdio)?;
        CmdOutput::from_output(out)
    }
}
