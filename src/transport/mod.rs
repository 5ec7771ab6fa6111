//! Host transport
//!
//! A channel is an opaque bidirectional pipe carrying one JSON value per
//! message between the orchestrator and a remote agent. How a channel is
//! opened is described by a [`ChannelSpec`]; the command form is selected
//! by an explicit strategy keyed on the connect method.

pub mod process;

use std::fmt;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

pub use process::{ProcessChannel, ProcessTransport};

/// Bootstrap line handed to the remote interpreter to start the agent.
pub const AGENT_BOOTSTRAP: &str = "import convoy_agent; convoy_agent.main()";

/// How channels to an environment's hosts are established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectMethod {
    /// Spawn the agent as a local child process (sandbox deployments).
    Local,
    /// Plain `ssh` to the host's fqdn.
    Ssh,
    /// `vagrant ssh`, for VM-based environments.
    Vagrant,
}

impl fmt::Display for ConnectMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectMethod::Local => "local",
            ConnectMethod::Ssh => "ssh",
            ConnectMethod::Vagrant => "vagrant",
        };
        f.write_str(name)
    }
}

/// Transport descriptor for one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSpec {
    /// Channel to a freshly spawned process on this machine.
    Local { interpreter: String },
    /// Channel to a remote host, optionally re-running the interpreter as
    /// another user (privilege escalation).
    Remote {
        fqdn: String,
        interpreter: String,
        method: ConnectMethod,
        run_as: Option<String>,
        timeout: Option<u64>,
    },
}

impl ChannelSpec {
    /// The argv that opens this channel and starts the agent over it.
    pub fn command(&self) -> Vec<String> {
        match self {
            ChannelSpec::Local { interpreter } => vec![
                interpreter.clone(),
                "-c".to_string(),
                AGENT_BOOTSTRAP.to_string(),
            ],
            ChannelSpec::Remote {
                fqdn,
                method: ConnectMethod::Vagrant,
                ..
            } => vec![
                "vagrant".to_string(),
                "ssh".to_string(),
                fqdn.clone(),
                "--".to_string(),
                "-C".to_string(),
                self.remote_command(),
            ],
            ChannelSpec::Remote { fqdn, timeout, .. } => {
                let mut argv = vec!["ssh".to_string(), "-C".to_string()];
                if let Some(seconds) = timeout {
                    argv.push("-o".to_string());
                    argv.push(format!("ConnectTimeout={}", seconds));
                }
                argv.push(fqdn.clone());
                argv.push(self.remote_command());
                argv
            }
        }
    }

    /// The command run on the far side: the interpreter starting the agent,
    /// wrapped in `sudo -u <user>` when escalation is requested.
    fn remote_command(&self) -> String {
        match self {
            ChannelSpec::Local { interpreter } => {
                format!("{} -c '{}'", interpreter, AGENT_BOOTSTRAP)
            }
            ChannelSpec::Remote {
                interpreter,
                run_as,
                ..
            } => match run_as {
                Some(user) => format!("sudo -u {} {} -c '{}'", user, interpreter, AGENT_BOOTSTRAP),
                None => format!("{} -c '{}'", interpreter, AGENT_BOOTSTRAP),
            },
        }
    }

    /// Short form for debug logging.
    pub fn describe(&self) -> String {
        match self {
            ChannelSpec::Local { interpreter } => format!("local://{}", interpreter),
            ChannelSpec::Remote {
                fqdn,
                method,
                run_as,
                ..
            } => match run_as {
                Some(user) => format!("{}://{}@{}", method, user, fqdn),
                None => format!("{}://{}", method, fqdn),
            },
        }
    }
}

/// Result type alias for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Transport-level channel failure
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The channel process could not be started
    #[error("failed to open channel: {0}")]
    Open(String),

    /// The far side closed the channel
    #[error("channel closed")]
    Closed,

    /// A message on the wire was not valid JSON
    #[error("invalid wire message: {0}")]
    Decode(String),

    /// IO error on the channel pipes
    #[error("channel IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One open channel to an agent.
pub trait Channel {
    /// Send one JSON message.
    fn send(&mut self, message: &Value) -> ChannelResult<()>;

    /// Receive the next JSON message. Fails with [`ChannelError::Closed`]
    /// at end of stream.
    fn recv(&mut self) -> ChannelResult<Value>;

    /// Tear the channel down. Idempotent, never fails.
    fn close(&mut self);
}

/// Opens channels from specs. Injected so deployments can be driven
/// against scripted channels in tests.
pub trait Transport {
    fn open(&self, spec: &ChannelSpec) -> ChannelResult<Box<dyn Channel>>;
}
