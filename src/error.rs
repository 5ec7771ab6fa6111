//! Error types for Convoy
//!
//! Uses `thiserror` for library errors. The deploy driver maps each kind
//! onto an exit disposition; see `deploy::conclude`.

use std::path::PathBuf;

use thiserror::Error;

use crate::output::{OutputSink, Style};
use crate::transport::ChannelError;

/// Result type alias for Convoy operations
pub type ConvoyResult<T> = Result<T, ConvoyError>;

/// Main error type for Convoy operations
#[derive(Error, Debug)]
pub enum ConvoyError {
    /// Environment file does not exist
    #[error("environment '{name}' not found in {search}")]
    MissingEnvironment {
        name: String,
        search: PathBuf,
        known: Vec<String>,
    },

    /// Invalid environment file or settings
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A remote agent signalled an expected deployment failure
    #[error("deployment failed on {host}")]
    Deployment { host: String },

    /// A remote agent crashed with a diagnostic message
    #[error("unexpected remote failure on {host}")]
    RemoteCrash { host: String },

    /// The wire protocol was violated (unknown tag, short channel, bad payload)
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Every host in the environment is ignored, no host can supply the plan
    #[error("no host available to provide the deployment plan")]
    NoReferenceHost,

    /// An operation needed a channel on a host that has none
    #[error("host {0} has no open channel")]
    NotConnected(String),

    /// Local repository verification or synchronization failed
    #[error("repository error: {0}")]
    Repository(String),

    /// Transport-level channel failure
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConvoyError {
    /// Render a detailed report for the kinds that carry one.
    pub fn report(&self, output: &dyn OutputSink) {
        match self {
            ConvoyError::MissingEnvironment { name, search, known } => {
                output.error(&format!(
                    "Environment '{}' not found in {}",
                    name,
                    search.display()
                ));
                if known.is_empty() {
                    output.annotate("No environments defined.", Style::red());
                } else {
                    output.annotate(
                        &format!("Known environments: {}", known.join(", ")),
                        Style::default(),
                    );
                }
            }
            ConvoyError::Deployment { host } => {
                output.error(&format!("Deployment failed on {}", host));
            }
            ConvoyError::NoReferenceHost => {
                output.error("Every host is ignored - no host can provide the deployment plan");
            }
            other => output.error(&other.to_string()),
        }
    }
}
