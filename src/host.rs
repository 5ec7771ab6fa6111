//! Hosts and connections
//!
//! Each declared host owns at most one connection. Local connections are a
//! single spawned agent; remote connections go through the bootstrap
//! sequence: base channel, identity check with at most one privilege
//! escalation, repository and base provisioning, then a reconnect into the
//! freshly provisioned runtime's interpreter.

use std::fmt;

use serde_json::{json, Value};

use crate::environment::Settings;
use crate::error::{ConvoyError, ConvoyResult};
use crate::output::{OutputSink, Style};
use crate::repository::RepositorySource;
use crate::rpc::{PlanEntry, RpcClient};
use crate::transport::{Channel, ChannelSpec, ConnectMethod, Transport};

/// The channel a host currently owns.
pub enum Connection {
    Local {
        channel: Box<dyn Channel>,
    },
    Remote {
        channel: Box<dyn Channel>,
        /// Interpreter the agent currently runs under. Replaced by the
        /// provisioned runtime's interpreter after bootstrap.
        interpreter: String,
        /// Whether the channel runs the agent as the service user via
        /// privilege escalation.
        privileged: bool,
    },
}

impl Connection {
    fn channel_mut(&mut self) -> &mut dyn Channel {
        match self {
            Connection::Local { channel } | Connection::Remote { channel, .. } => channel.as_mut(),
        }
    }

    fn close(&mut self) {
        self.channel_mut().close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connection::Local { .. } => f.debug_struct("Local").finish_non_exhaustive(),
            Connection::Remote {
                interpreter,
                privileged,
                ..
            } => f
                .debug_struct("Remote")
                .field("interpreter", interpreter)
                .field("privileged", privileged)
                .finish_non_exhaustive(),
        }
    }
}

/// One declared host of an environment.
#[derive(Debug)]
pub struct Host {
    pub fqdn: String,
    /// Short name: the fqdn up to the first dot.
    pub name: String,
    pub ignore: bool,
    connection: Option<Connection>,
}

impl Host {
    pub fn new(fqdn: impl Into<String>, ignore: bool) -> Self {
        let fqdn = fqdn.into();
        let name = fqdn
            .split('.')
            .next()
            .unwrap_or(fqdn.as_str())
            .to_string();
        Self {
            fqdn,
            name,
            ignore,
            connection: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    /// Open this host's channel and start the agent over it.
    pub fn connect(
        &mut self,
        settings: &Settings,
        transport: &dyn Transport,
        output: &dyn OutputSink,
    ) -> ConvoyResult<()> {
        match settings.connect_method {
            ConnectMethod::Local => self.connect_local(settings, transport, output),
            _ => self.connect_remote(&settings.interpreter, settings, transport, output),
        }
    }

    fn connect_local(
        &mut self,
        settings: &Settings,
        transport: &dyn Transport,
        output: &dyn OutputSink,
    ) -> ConvoyResult<()> {
        self.teardown(output);
        let spec = ChannelSpec::Local {
            interpreter: settings.interpreter.clone(),
        };
        output.annotate(&format!("channel: {}", spec.describe()), Style::debug());
        let channel = transport.open(&spec)?;
        self.connection = Some(Connection::Local { channel });
        Ok(())
    }

    /// Open a remote channel under `interpreter`, escalating to the
    /// service user at most once when the agent's identity does not match.
    fn connect_remote(
        &mut self,
        interpreter: &str,
        settings: &Settings,
        transport: &dyn Transport,
        output: &dyn OutputSink,
    ) -> ConvoyResult<()> {
        self.teardown(output);

        let spec = self.remote_spec(interpreter, settings, None);
        output.annotate(&format!("channel: {}", spec.describe()), Style::debug());
        let mut channel = transport.open(&spec)?;

        let identity = RpcClient::new(&self.fqdn, channel.as_mut(), output).whoami()?;
        let privileged = identity != settings.service_user;
        if privileged {
            channel.close();
            let spec =
                self.remote_spec(interpreter, settings, Some(settings.service_user.clone()));
            output.annotate(&format!("channel: {}", spec.describe()), Style::debug());
            channel = transport.open(&spec)?;
        }

        self.connection = Some(Connection::Remote {
            channel,
            interpreter: interpreter.to_string(),
            privileged,
        });
        Ok(())
    }

    fn remote_spec(
        &self,
        interpreter: &str,
        settings: &Settings,
        run_as: Option<String>,
    ) -> ChannelSpec {
        ChannelSpec::Remote {
            fqdn: self.fqdn.clone(),
            interpreter: interpreter.to_string(),
            method: settings.connect_method,
            run_as,
            timeout: settings.timeout,
        }
    }

    fn teardown(&mut self, output: &dyn OutputSink) {
        if let Some(mut connection) = self.connection.take() {
            output.annotate("Reconnecting ...", Style::debug());
            connection.close();
        }
    }

    /// Bootstrap the connected host so it can run deployment components.
    pub fn start(
        &mut self,
        settings: &Settings,
        repository: &dyn RepositorySource,
        transport: &dyn Transport,
        output: &dyn OutputSink,
    ) -> ConvoyResult<()> {
        match self.connection {
            Some(Connection::Local { .. }) => self.start_local(settings, output),
            Some(Connection::Remote { .. }) => {
                self.start_remote(settings, repository, transport, output)
            }
            None => Err(ConvoyError::NotConnected(self.name.clone())),
        }
    }

    fn start_local(&mut self, settings: &Settings, output: &dyn OutputSink) -> ConvoyResult<()> {
        let fqdn = self.fqdn.clone();
        let working_dir = std::env::current_dir()?;
        let mut agent = self.agent(output)?;
        agent.lock()?;
        agent.setup_output()?;
        agent.setup_deployment(
            &working_dir.to_string_lossy(),
            &settings.name,
            &fqdn,
            &settings.overrides,
        )?;
        Ok(())
    }

    fn start_remote(
        &mut self,
        settings: &Settings,
        repository: &dyn RepositorySource,
        transport: &dyn Transport,
        output: &dyn OutputSink,
    ) -> ConvoyResult<()> {
        output.step(&self.name, "Bootstrapping ...", Style::debug());
        let fqdn = self.fqdn.clone();

        let (remote_repository, remote_base) = {
            let mut agent = self.agent(output)?;
            agent.lock()?;
            let remote_repository =
                agent.ensure_repository(&settings.target_directory, &settings.update_method)?;
            let remote_base = agent.ensure_base(&settings.deployment_base)?;
            (remote_repository, remote_base)
        };

        output.step(&self.name, "Updating repository ...", Style::debug());
        repository.update(&fqdn, &remote_repository, output)?;

        let bootstrap = bootstrap_descriptor(&settings.version, settings.develop);
        self.agent(output)?.build_runtime(&remote_base, &bootstrap)?;

        // Replace the basic interpreter channel with one into the runtime
        // that was just provisioned.
        let provisioned = format!("{}/.convoy/bin/python", remote_base);
        self.connect_remote(&provisioned, settings, transport, output)?;

        // The reconnect dropped all agent state; prime it again.
        let mut agent = self.agent(output)?;
        agent.setup_output()?;
        agent.ensure_repository(&settings.target_directory, &settings.update_method)?;
        agent.setup_deployment(&remote_base, &settings.name, &fqdn, &settings.overrides)?;
        Ok(())
    }

    /// Fetch the ordered deployment plan from this host's agent.
    pub fn plan(&mut self, output: &dyn OutputSink) -> ConvoyResult<Vec<PlanEntry>> {
        self.agent(output)?.plan()
    }

    /// Deploy one component on this host.
    pub fn deploy_component(
        &mut self,
        component: &str,
        output: &dyn OutputSink,
    ) -> ConvoyResult<()> {
        self.agent(output)?.deploy_component(component)
    }

    /// Close this host's channel. Safe when none was ever opened.
    pub fn disconnect(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }
    }

    /// Client against the host's current channel.
    fn agent<'a>(&'a mut self, output: &'a dyn OutputSink) -> ConvoyResult<RpcClient<'a>> {
        let Host {
            fqdn,
            name,
            connection,
            ..
        } = self;
        match connection {
            Some(connection) => Ok(RpcClient::new(
                fqdn.as_str(),
                connection.channel_mut(),
                output,
            )),
            None => Err(ConvoyError::NotConnected(name.clone())),
        }
    }
}

/// Descriptor the agent materializes the isolated runtime from.
pub fn bootstrap_descriptor(version: &str, develop: bool) -> Value {
    json!({
        "version": version,
        "develop": develop,
    })
}
