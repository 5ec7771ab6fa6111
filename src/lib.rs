//! Convoy - dependency-ordered configuration deployment
//!
//! Convoy drives a fleet of hosts through an idempotent bootstrap sequence
//! and executes a globally ordered deployment plan over a small
//! call/response protocol. Hosts are reached through opaque bidirectional
//! channels (a spawned local process, or ssh/vagrant for remote hosts).

pub mod cli;
pub mod config;
pub mod deploy;
pub mod environment;
pub mod error;
pub mod host;
pub mod lock;
pub mod notify;
pub mod output;
pub mod repository;
pub mod rpc;
pub mod transport;

// Re-exports for convenience
pub use config::{EnvironmentConfig, HostConfig, Overrides};
pub use deploy::{conclude, run, ConnectionSequence, DeployOptions, Deployment, RunReport};
pub use environment::{Environment, Settings};
pub use error::{ConvoyError, ConvoyResult};
pub use host::{bootstrap_descriptor, Connection, Host};
pub use output::{section_line, OutputSink, Style, TerminalOutput};
pub use repository::{GitRsyncRepository, RepositorySource};
pub use rpc::{Message, PlanEntry, RpcClient};
pub use transport::{
    Channel, ChannelError, ChannelResult, ChannelSpec, ConnectMethod, ProcessChannel,
    ProcessTransport, Transport,
};
