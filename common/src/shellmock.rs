use crate::{
    shellhandler::{CmdOutput, CommandRunner},
    Error, Result,
};
use std::sync::Mutex;

/// One scripted tool answer. The mock matches on the full command line
/// rendered as "program arg1 arg2 ...".
#[derive(Clone, Debug)]
pub struct ScriptedCall {
    pub command: String,
    pub output: CmdOutput,
}

impl ScriptedCall {
    pub fn ok(command: &str, stdout: &str) -> ScriptedCall {
        ScriptedCall {
            command: command.to_string(),
            output: CmdOutput::ok(stdout),
        }
    }

    pub fn failed(command: &str, code: i32, stderr: &str) -> ScriptedCall {
        ScriptedCall {
            command: command.to_string(),
            output: CmdOutput::failed(code, stderr),
        }
    }
}

/// Scripted CommandRunner used by the tests across the crate.
/// Records every command it receives so tests can assert on what did
/// (or did not) reach the host tools.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    mocks: Vec<ScriptedCall>,
    calls: Mutex<Vec<String>>,
    stdins: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    #[must_use]
    pub fn new(mocks: Vec<ScriptedCall>) -> Self {
        Self {
            mocks,
            calls: Mutex::new(Vec::new()),
            stdins: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn stdins(&self) -> Vec<String> {
        self.stdins.lock().unwrap().clone()
    }

    fn answer(&self, line: &str) -> Result<CmdOutput> {
        self.calls.lock().unwrap().push(line.to_string());
        let found: Vec<ScriptedCall> = self
            .mocks
            .clone()
            .into_iter()
            .filter(|m| m.command == line)
            .collect();
        if !found.is_empty() {
            Ok(found[0].output.clone())
        } else {
            Err(Error::Other(format!(
                "Failed to find '{line}' in the mock database"
            )))
        }
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CmdOutput> {
        let line = format!("{} {}", program, args.join(" "));
        self.answer(line.trim())
    }

    fn run_with_stdin(&self, program: &str, args: &[&str], input: &str) -> Result<CmdOutput> {
        self.stdins.lock().unwrap().push(input.to_string());
        let line = format!("{} {}", program, args.join(" "));
        self.answer(line.trim())
    }
}
