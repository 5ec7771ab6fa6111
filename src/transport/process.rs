//! Process-backed channels
//!
//! Spawns the channel command and speaks line-delimited JSON over the
//! child's stdin/stdout. Stderr stays attached to the operator's terminal
//! so remote diagnostics are not swallowed.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use serde_json::Value;

use super::{Channel, ChannelError, ChannelResult, ChannelSpec, Transport};

/// Production transport: every channel is a spawned process.
pub struct ProcessTransport;

impl Transport for ProcessTransport {
    fn open(&self, spec: &ChannelSpec) -> ChannelResult<Box<dyn Channel>> {
        let argv = spec.command();
        Ok(Box::new(ProcessChannel::spawn(&argv)?))
    }
}

/// A channel over a child process's stdio.
pub struct ProcessChannel {
    child: Child,
    stdin: Option<ChildStdin>,
    reader: BufReader<ChildStdout>,
}

impl ProcessChannel {
    /// Spawn `argv` with piped stdin/stdout.
    pub fn spawn(argv: &[String]) -> ChannelResult<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| ChannelError::Open("empty channel command".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| ChannelError::Open(format!("{}: {}", program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ChannelError::Open("child has no stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ChannelError::Open("child has no stdout".to_string()))?;

        Ok(Self {
            child,
            stdin: Some(stdin),
            reader: BufReader::new(stdout),
        })
    }
}

impl Channel for ProcessChannel {
    fn send(&mut self, message: &Value) -> ChannelResult<()> {
        let stdin = self.stdin.as_mut().ok_or(ChannelError::Closed)?;
        let line = serde_json::to_string(message)
            .map_err(|e| ChannelError::Decode(e.to_string()))?;
        writeln!(stdin, "{}", line)?;
        stdin.flush()?;
        Ok(())
    }

    fn recv(&mut self) -> ChannelResult<Value> {
        let mut line = String::new();
        let read = self.reader.read_line(&mut line)?;
        if read == 0 {
            return Err(ChannelError::Closed);
        }
        serde_json::from_str(line.trim()).map_err(|e| ChannelError::Decode(e.to_string()))
    }

    fn close(&mut self) {
        // Dropping stdin signals EOF to a well-behaved agent; the kill
        // covers one that is not.
        self.stdin.take();
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for ProcessChannel {
    fn drop(&mut self) {
        self.close();
    }
}
