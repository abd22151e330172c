//! External program invocation
//!
//! Every external collaborator (the certificate re-encoder, the public-key
//! extractor, the downstream validator) is reached through the narrow
//! [`CommandRunner`] capability so the pipeline can be exercised in tests
//! without real binaries on the PATH.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::process::{Command, Stdio};
use std::thread;

/// Captured result of one external program run
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Exit status code, `None` if the process was killed by a signal
    pub status: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl RunOutput {
    /// Whether the program exited with status 0
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Capability interface for running external programs synchronously
pub trait CommandRunner {
    /// Run `program` with `args`, feeding `stdin` and capturing both output
    /// streams. Blocks until the program exits.
    fn run(&self, program: &str, args: &[String], stdin: &[u8]) -> io::Result<RunOutput>;
}

/// Runner backed by real `std::process::Command` invocations
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String], stdin: &[u8]) -> io::Result<RunOutput> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Feed stdin from its own thread while the output pipes drain;
        // writing it inline can deadlock once the child fills its
        // stdout pipe before consuming all of its input.
        let writer = child.stdin.take().map(|mut pipe| {
            let payload = stdin.to_vec();
            thread::spawn(move || {
                let _ = pipe.write_all(&payload);
                // Dropping closes the pipe so the child sees EOF
            })
        });

        let output = child.wait_with_output()?;

        if let Some(handle) = writer {
            let _ = handle.join();
        }

        Ok(RunOutput {
            status: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// One recorded invocation, for assertions in tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Vec<u8>,
}

/// Scripted runner for tests: records every call and replays queued outputs
/// in order. Running off the end of the script returns a failing output so
/// a test with a wrong expectation fails loudly instead of hanging.
#[derive(Default)]
pub struct ScriptedRunner {
    outputs: RefCell<VecDeque<RunOutput>>,
    calls: RefCell<Vec<RecordedCall>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful run producing `stdout`
    pub fn push_success(&self, stdout: &[u8]) {
        self.outputs.borrow_mut().push_back(RunOutput {
            status: Some(0),
            stdout: stdout.to_vec(),
            stderr: Vec::new(),
        });
    }

    /// Queue a failing run with the given exit status
    pub fn push_failure(&self, status: i32, stderr: &[u8]) {
        self.outputs.borrow_mut().push_back(RunOutput {
            status: Some(status),
            stdout: Vec::new(),
            stderr: stderr.to_vec(),
        });
    }

    /// All invocations recorded so far
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.borrow().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[String], stdin: &[u8]) -> io::Result<RunOutput> {
        self.calls.borrow_mut().push(RecordedCall {
            program: program.to_string(),
            args: args.to_vec(),
            stdin: stdin.to_vec(),
        });

        Ok(self.outputs.borrow_mut().pop_front().unwrap_or(RunOutput {
            status: Some(127),
            stdout: Vec::new(),
            stderr: b"scripted runner: no output queued".to_vec(),
        }))
    }
}
