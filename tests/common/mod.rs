//! Shared helpers for deployment scenario tests: a scripted agent behind a
//! fake transport, a recording output sink, and environment file builders.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde_json::{json, Map, Value};

use convoy::output::{OutputSink, Style};
use convoy::repository::RepositorySource;
use convoy::transport::{Channel, ChannelError, ChannelResult, ChannelSpec, Transport};
use convoy::ConvoyResult;

/// Everything the fake transport observed across all channels.
#[derive(Default)]
pub struct FakeState {
    /// Specs of every channel opened, in order.
    pub opened: Vec<ChannelSpec>,
    /// Every rpc request as (origin, method), in order.
    pub calls: Vec<(String, String)>,
    /// Every `deploy_component` dispatch as (origin, component).
    pub deployed: Vec<(String, String)>,
    /// Number of channel closes.
    pub closed: usize,
}

/// Transport whose channels answer like a canned agent.
pub struct FakeTransport {
    pub state: Arc<Mutex<FakeState>>,
    login_user: String,
    plan: Vec<Value>,
    failing: HashSet<String>,
}

impl FakeTransport {
    /// Channels opened without escalation report `login_user` from
    /// `whoami`; escalated channels report their `run_as` user.
    pub fn new(login_user: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState::default())),
            login_user: login_user.to_string(),
            plan: Vec::new(),
            failing: HashSet::new(),
        }
    }

    /// Plan returned by every agent: (host, component, component-ignored).
    pub fn with_plan(mut self, entries: &[(&str, &str, bool)]) -> Self {
        self.plan = entries
            .iter()
            .map(|(host, component, ignore)| json!([host, component, ignore]))
            .collect();
        self
    }

    /// Components whose dispatch answers `remote-error`.
    pub fn failing_component(mut self, component: &str) -> Self {
        self.failing.insert(component.to_string());
        self
    }

    pub fn opened_fqdns(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .opened
            .iter()
            .map(|spec| match spec {
                ChannelSpec::Local { .. } => "local".to_string(),
                ChannelSpec::Remote { fqdn, .. } => fqdn.clone(),
            })
            .collect()
    }

    pub fn calls_for(&self, origin: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(from, _)| from == origin)
            .map(|(_, method)| method.clone())
            .collect()
    }

    pub fn deployed(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().deployed.clone()
    }
}

impl Transport for FakeTransport {
    fn open(&self, spec: &ChannelSpec) -> ChannelResult<Box<dyn Channel>> {
        self.state.lock().unwrap().opened.push(spec.clone());
        let (origin, identity) = match spec {
            ChannelSpec::Local { .. } => ("local".to_string(), self.login_user.clone()),
            ChannelSpec::Remote { fqdn, run_as, .. } => (
                fqdn.clone(),
                run_as.clone().unwrap_or_else(|| self.login_user.clone()),
            ),
        };
        Ok(Box::new(FakeChannel {
            state: self.state.clone(),
            origin,
            identity,
            plan: self.plan.clone(),
            failing: self.failing.clone(),
            pending: VecDeque::new(),
        }))
    }
}

/// One scripted channel: answers every request immediately.
pub struct FakeChannel {
    state: Arc<Mutex<FakeState>>,
    origin: String,
    identity: String,
    plan: Vec<Value>,
    failing: HashSet<String>,
    pending: VecDeque<Value>,
}

impl Channel for FakeChannel {
    fn send(&mut self, message: &Value) -> ChannelResult<()> {
        let items = message
            .as_array()
            .ok_or_else(|| ChannelError::Decode(format!("bad request: {}", message)))?;
        let method = items
            .first()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let args = items
            .get(1)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        self.state
            .lock()
            .unwrap()
            .calls
            .push((self.origin.clone(), method.clone()));

        let response = match method.as_str() {
            "whoami" => json!(["result", self.identity]),
            "ensure_repository" => json!(["result", "/srv/deployment"]),
            "ensure_base" => json!(["result", "/srv/deployment-base"]),
            "plan" => json!(["result", self.plan]),
            "deploy_component" => {
                let component = args
                    .first()
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                self.state
                    .lock()
                    .unwrap()
                    .deployed
                    .push((self.origin.clone(), component.clone()));
                if self.failing.contains(&component) {
                    json!(["remote-error"])
                } else {
                    json!(["result", null])
                }
            }
            _ => json!(["result", null]),
        };
        self.pending.push_back(response);
        Ok(())
    }

    fn recv(&mut self) -> ChannelResult<Value> {
        self.pending.pop_front().ok_or(ChannelError::Closed)
    }

    fn close(&mut self) {
        self.state.lock().unwrap().closed += 1;
    }
}

/// Repository port that records updates and never touches git or rsync.
#[derive(Default)]
pub struct NoopRepository {
    pub updates: Mutex<Vec<(String, String)>>,
}

impl RepositorySource for NoopRepository {
    fn verify(&self, _output: &dyn OutputSink) -> ConvoyResult<()> {
        Ok(())
    }

    fn update(
        &self,
        fqdn: &str,
        remote_path: &str,
        _output: &dyn OutputSink,
    ) -> ConvoyResult<()> {
        self.updates
            .lock()
            .unwrap()
            .push((fqdn.to_string(), remote_path.to_string()));
        Ok(())
    }
}

/// Output sink recording events as flat strings for assertions.
#[derive(Clone, Default)]
pub struct RecordingOutput {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl RecordingOutput {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn steps(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|event| event.starts_with("step:"))
            .collect()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl OutputSink for RecordingOutput {
    fn line(&self, message: &str, _style: Style) {
        self.push(format!("line:{}", message));
    }

    fn section(&self, title: &str, _style: Style) {
        self.push(format!("section:{}", title));
    }

    fn step(&self, context: &str, message: &str, _style: Style) {
        self.push(format!("step:{}:{}", context, message));
    }

    fn annotate(&self, _message: &str, _style: Style) {}

    fn error(&self, message: &str) {
        self.push(format!("error:{}", message));
    }

    fn forward(&self, op: &str, args: &[Value], _kwargs: &Map<String, Value>) {
        self.push(format!("forward:{}:{}", op, Value::Array(args.to_vec())));
    }
}

/// Write `environments/<name>.toml` under `dir`.
pub fn write_environment(dir: &Path, name: &str, content: &str) {
    std::fs::write(dir.join(format!("{}.toml", name)), content).unwrap();
}
