//! RPC client
//!
//! Turns method-style requests into wire messages over a channel. One
//! request is outstanding at a time; the client loops over incoming
//! messages, forwarding `progress` events to the output sink until a
//! terminal message arrives.
//!
//! Wire shapes:
//! - request: `[method, args, kwargs]`
//! - `["result", value]` — terminal, the call's return value
//! - `["progress", op, args, kwargs]` — forwarded verbatim, non-terminal
//! - `["remote-error"]` — terminal, expected deployment failure
//! - `["remote-crash", message]` — terminal, unexpected agent failure
//! - anything else — terminal by policy, protocol violation

use serde_json::{json, Map, Value};

use crate::config::Overrides;
use crate::error::{ConvoyError, ConvoyResult};
use crate::output::{OutputSink, Style};
use crate::transport::{Channel, ChannelError};

/// One decoded wire message from an agent.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Result(Value),
    Progress {
        op: String,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    },
    RemoteError,
    RemoteCrash(String),
    Unknown(String),
}

impl Message {
    /// Decode a raw wire value. Unrecognized tags decode to
    /// [`Message::Unknown`]; only structurally broken messages fail.
    pub fn parse(raw: &Value) -> Result<Message, String> {
        let items = raw
            .as_array()
            .ok_or_else(|| format!("expected message array, got {}", raw))?;
        let tag = items
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| format!("message without a tag: {}", raw))?;

        match tag {
            "result" => Ok(Message::Result(items.get(1).cloned().unwrap_or(Value::Null))),
            "progress" => {
                let op = items
                    .get(1)
                    .and_then(Value::as_str)
                    .ok_or_else(|| format!("progress message without an op: {}", raw))?;
                let args = items
                    .get(2)
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let kwargs = items
                    .get(3)
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                Ok(Message::Progress {
                    op: op.to_string(),
                    args,
                    kwargs,
                })
            }
            "remote-error" => Ok(Message::RemoteError),
            "remote-crash" => {
                let message = items
                    .get(1)
                    .and_then(Value::as_str)
                    .unwrap_or("remote agent crashed without a message")
                    .to_string();
                Ok(Message::RemoteCrash(message))
            }
            other => Ok(Message::Unknown(other.to_string())),
        }
    }
}

/// One entry of the ordered deployment plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub host: String,
    pub component: String,
    pub ignore: bool,
}

impl PlanEntry {
    fn parse(raw: &Value) -> Result<Self, String> {
        let items = raw
            .as_array()
            .ok_or_else(|| format!("malformed plan entry: {}", raw))?;
        let host = items.first().and_then(Value::as_str);
        let component = items.get(1).and_then(Value::as_str);
        let ignore = items.get(2).and_then(Value::as_bool);
        match (host, component, ignore) {
            (Some(host), Some(component), Some(ignore)) => Ok(Self {
                host: host.to_string(),
                component: component.to_string(),
                ignore,
            }),
            _ => Err(format!("malformed plan entry: {}", raw)),
        }
    }
}

/// Client for one host's agent, bound to the host's current channel.
///
/// Constructed per call site against whatever channel the host currently
/// owns, so channel replacement during bootstrap rebinds automatically.
pub struct RpcClient<'a> {
    host: &'a str,
    channel: &'a mut dyn Channel,
    output: &'a dyn OutputSink,
}

impl<'a> RpcClient<'a> {
    pub fn new(host: &'a str, channel: &'a mut dyn Channel, output: &'a dyn OutputSink) -> Self {
        Self {
            host,
            channel,
            output,
        }
    }

    /// Send one request and receive messages until a terminal one arrives.
    pub fn call(
        &mut self,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> ConvoyResult<Value> {
        self.output.annotate(
            &format!(
                "rpc {}: {}({}, {})",
                self.host,
                method,
                Value::Array(args.clone()),
                Value::Object(kwargs.clone()),
            ),
            Style::debug(),
        );

        let request = json!([method, args, kwargs]);
        self.channel
            .send(&request)
            .map_err(|e| ConvoyError::Protocol(format!("sending request: {}", e)))?;

        loop {
            let raw = match self.channel.recv() {
                Ok(value) => value,
                Err(ChannelError::Closed) => {
                    return Err(ConvoyError::Protocol(
                        "channel closed before a terminal message".to_string(),
                    ))
                }
                Err(other) => return Err(ConvoyError::Protocol(other.to_string())),
            };
            self.output
                .annotate(&format!("message: {}", raw), Style::debug());

            match Message::parse(&raw).map_err(ConvoyError::Protocol)? {
                Message::Result(value) => return Ok(value),
                Message::Progress { op, args, kwargs } => {
                    self.output.forward(&op, &args, &kwargs);
                }
                Message::RemoteError => {
                    return Err(ConvoyError::Deployment {
                        host: self.host.to_string(),
                    })
                }
                Message::RemoteCrash(message) => {
                    self.output.error(&message);
                    return Err(ConvoyError::RemoteCrash {
                        host: self.host.to_string(),
                    });
                }
                Message::Unknown(tag) => {
                    return Err(ConvoyError::Protocol(format!(
                        "unknown message tag '{}'",
                        tag
                    )))
                }
            }
        }
    }

    fn simple(&mut self, method: &str, args: Vec<Value>) -> ConvoyResult<()> {
        self.call(method, args, Map::new()).map(drop)
    }

    fn string_result(&mut self, method: &str, args: Vec<Value>) -> ConvoyResult<String> {
        let value = self.call(method, args, Map::new())?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                ConvoyError::Protocol(format!("malformed result for '{}': {}", method, value))
            })
    }

    /// Acquire the host-scoped deployment lock.
    pub fn lock(&mut self) -> ConvoyResult<()> {
        self.simple("lock", vec![])
    }

    /// Route the agent's output through this client's sink.
    pub fn setup_output(&mut self) -> ConvoyResult<()> {
        self.simple("setup_output", vec![])
    }

    /// Prime the agent's deployment context.
    pub fn setup_deployment(
        &mut self,
        base: &str,
        environment: &str,
        fqdn: &str,
        overrides: &Overrides,
    ) -> ConvoyResult<()> {
        self.simple(
            "setup_deployment",
            vec![json!(base), json!(environment), json!(fqdn), json!(overrides)],
        )
    }

    /// Ensure the repository location exists; returns its absolute path.
    pub fn ensure_repository(
        &mut self,
        target_directory: &str,
        update_method: &str,
    ) -> ConvoyResult<String> {
        self.string_result(
            "ensure_repository",
            vec![json!(target_directory), json!(update_method)],
        )
    }

    /// Ensure the deployment base exists; returns its absolute path.
    pub fn ensure_base(&mut self, deployment_base: &str) -> ConvoyResult<String> {
        self.string_result("ensure_base", vec![json!(deployment_base)])
    }

    /// Materialize the isolated runtime from a bootstrap descriptor.
    pub fn build_runtime(&mut self, base: &str, bootstrap: &Value) -> ConvoyResult<()> {
        self.simple("build_runtime", vec![json!(base), bootstrap.clone()])
    }

    /// Identity the agent is running as.
    pub fn whoami(&mut self) -> ConvoyResult<String> {
        self.string_result("whoami", vec![])
    }

    /// The ordered deployment plan.
    pub fn plan(&mut self) -> ConvoyResult<Vec<PlanEntry>> {
        let value = self.call("plan", vec![], Map::new())?;
        let items = value
            .as_array()
            .ok_or_else(|| ConvoyError::Protocol(format!("malformed plan: {}", value)))?;
        items
            .iter()
            .map(|entry| PlanEntry::parse(entry).map_err(ConvoyError::Protocol))
            .collect()
    }

    /// Deploy one component on this host.
    pub fn deploy_component(&mut self, component: &str) -> ConvoyResult<()> {
        self.simple("deploy_component", vec![json!(component)])
    }
}
