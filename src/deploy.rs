//! Deployment orchestration
//!
//! Phases run linearly and are never retried:
//! `load -> configure -> [connect -> deploy] -> disconnect`, with the
//! bracketed pair skipped in check-only mode. Connection establishment is
//! partially overlapped with planning: `configure` bootstraps exactly one
//! host so the plan can be fetched before the rest of the fleet is
//! committed to, `connect` then drains the same sequence.

use std::path::{Path, PathBuf};

use crate::environment::Environment;
use crate::error::{ConvoyError, ConvoyResult};
use crate::lock::{self, DeployLock};
use crate::notify;
use crate::output::{OutputSink, Style, TerminalOutput};
use crate::repository::{GitRsyncRepository, RepositorySource};
use crate::transport::{ProcessTransport, Transport};

/// Options for one deployment run.
#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub environment: String,
    pub platform: Option<String>,
    pub timeout: Option<u64>,
    pub dirty: bool,
    pub fast: bool,
    pub check_only: bool,
    pub verbose: bool,
    /// Where environment files live, relative to the working directory.
    pub environments_dir: PathBuf,
}

impl DeployOptions {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            platform: None,
            timeout: None,
            dirty: false,
            fast: false,
            check_only: false,
            verbose: false,
            environments_dir: PathBuf::from("environments"),
        }
    }
}

/// Resumable iterator over "connect and start one host" steps.
///
/// Ignored hosts are reported and skipped without opening a channel, but
/// still count towards the step positions.
pub struct ConnectionSequence {
    next: usize,
    total: usize,
}

impl ConnectionSequence {
    pub fn new(total: usize) -> Self {
        Self { next: 0, total }
    }

    /// Connect and bootstrap the next eligible host. Returns `false` when
    /// the sequence is exhausted.
    pub fn advance_one(
        &mut self,
        environment: &mut Environment,
        repository: &dyn RepositorySource,
        transport: &dyn Transport,
        output: &dyn OutputSink,
    ) -> ConvoyResult<bool> {
        while self.next < self.total {
            let index = self.next;
            self.next += 1;
            let position = index + 1;

            let settings = &environment.settings;
            let host = &mut environment.hosts[index];
            if host.ignore {
                output.step(
                    &host.name,
                    &format!("Connection ignored ({}/{})", position, self.total),
                    Style::red(),
                );
                continue;
            }

            output.step(
                &host.name,
                &format!(
                    "Connecting via {} ({}/{})",
                    settings.connect_method, position, self.total
                ),
                Style::bold(),
            );
            host.connect(settings, transport, output)?;
            host.start(settings, repository, transport, output)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Connect and bootstrap every remaining eligible host.
    pub fn drain_remaining(
        &mut self,
        environment: &mut Environment,
        repository: &dyn RepositorySource,
        transport: &dyn Transport,
        output: &dyn OutputSink,
    ) -> ConvoyResult<()> {
        while self.advance_one(environment, repository, transport, output)? {}
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.total - self.next
    }
}

/// Phase machine for one deployment run.
pub struct Deployment<'a> {
    options: DeployOptions,
    repository: &'a dyn RepositorySource,
    transport: &'a dyn Transport,
    output: &'a dyn OutputSink,
    environment: Option<Environment>,
    connections: Option<ConnectionSequence>,
}

impl<'a> Deployment<'a> {
    pub fn new(
        options: DeployOptions,
        repository: &'a dyn RepositorySource,
        transport: &'a dyn Transport,
        output: &'a dyn OutputSink,
    ) -> Self {
        Self {
            options,
            repository,
            transport,
            output,
            environment: None,
            connections: None,
        }
    }

    /// Build and validate the configuration, verify the repository, load
    /// secrets. Fails before any host is touched.
    pub fn load(&mut self) -> ConvoyResult<()> {
        let output = self.output;
        output.section("Preparing", Style::bold());

        output.step(
            "main",
            &format!("Loading environment `{}` ...", self.options.environment),
            Style::bold(),
        );
        let (mut environment, warnings) = Environment::load(
            &self.options.environment,
            &self.options.environments_dir,
            self.options.platform.clone(),
            self.options.timeout,
        )?;
        for key in warnings {
            output.annotate(
                &format!("Ignoring unknown environment setting '{}'", key),
                Style::red(),
            );
        }

        output.step("main", "Verifying repository ...", Style::bold());
        self.repository.verify(output)?;

        output.step("main", "Loading secrets ...", Style::bold());
        environment.load_secrets(&self.options.environments_dir)?;

        self.environment = Some(environment);
        Ok(())
    }

    /// Connect and bootstrap the first eligible host only, so a planning
    /// failure costs at most one bootstrap.
    pub fn configure(&mut self) -> ConvoyResult<()> {
        self.output.section("Configuring first host", Style::bold());
        let environment = self.environment.as_mut().ok_or_else(not_loaded)?;
        let mut sequence = ConnectionSequence::new(environment.hosts.len());
        sequence.advance_one(environment, self.repository, self.transport, self.output)?;
        self.connections = Some(sequence);
        Ok(())
    }

    /// Connect and bootstrap every other eligible host, in order.
    pub fn connect(&mut self) -> ConvoyResult<()> {
        self.output
            .section("Connecting remaining hosts", Style::bold());
        let environment = self.environment.as_mut().ok_or_else(not_loaded)?;
        let sequence = self.connections.as_mut().ok_or_else(not_loaded)?;
        sequence.drain_remaining(environment, self.repository, self.transport, self.output)
    }

    /// Fetch the plan from the reference host and execute it in order,
    /// applying the centralized skip policy. Fail-fast on the first
    /// dispatch failure.
    pub fn deploy(&mut self) -> ConvoyResult<()> {
        self.output.section("Deploying", Style::bold());
        let environment = self.environment.as_mut().ok_or_else(not_loaded)?;

        let reference = environment
            .reference_host_index()
            .ok_or(ConvoyError::NoReferenceHost)?;
        let plan = environment.hosts[reference].plan(self.output)?;

        for entry in plan {
            let Some(index) = environment.host_index(&entry.host) else {
                return Err(ConvoyError::Protocol(format!(
                    "plan references unknown host '{}'",
                    entry.host
                )));
            };

            if environment.hosts[index].ignore {
                self.output.step(
                    &entry.host,
                    &format!("Skipping component {} ... (Host ignored)", entry.component),
                    Style::red(),
                );
                continue;
            }
            if entry.ignore {
                self.output.step(
                    &entry.host,
                    &format!(
                        "Skipping component {} ... (Component ignored)",
                        entry.component
                    ),
                    Style::red(),
                );
                continue;
            }

            self.output.step(
                &entry.host,
                &format!("Deploying component {} ...", entry.component),
                Style::bold(),
            );
            environment.hosts[index].deploy_component(&entry.component, self.output)?;
        }
        Ok(())
    }

    /// Close every host's channel. Safe on every exit path, including
    /// hosts that never connected.
    pub fn disconnect(&mut self) {
        self.output
            .step("main", "Disconnecting from hosts ...", Style::debug());
        if let Some(environment) = self.environment.as_mut() {
            for host in &mut environment.hosts {
                host.disconnect();
            }
        }
    }

    /// Run all phases in order. Check-only mode stops after `configure`.
    pub fn execute(&mut self) -> ConvoyResult<()> {
        self.load()?;
        self.configure()?;
        if !self.options.check_only {
            self.connect()?;
            self.deploy()?;
        }
        Ok(())
    }

    pub fn environment(&self) -> Option<&Environment> {
        self.environment.as_ref()
    }
}

fn not_loaded() -> ConvoyError {
    ConvoyError::Configuration("environment is not loaded".to_string())
}

/// Exit disposition of a finished run.
pub struct RunReport {
    pub exit_code: i32,
    pub notification: Option<(String, String)>,
}

/// Classify a run's outcome: render the closing sections and produce the
/// exit code and notification for it.
pub fn conclude(
    outcome: &ConvoyResult<()>,
    environment: &str,
    check_only: bool,
    output: &dyn OutputSink,
) -> RunReport {
    let bold_red = Style {
        bold: true,
        ..Style::red()
    };
    let bold_green = Style {
        bold: true,
        ..Style::green()
    };

    match outcome {
        Ok(()) => {
            if check_only {
                output.section("CHECK FINISHED", bold_green);
                RunReport {
                    exit_code: 0,
                    notification: Some((
                        "Deployment check finished".to_string(),
                        format!("Successfully checked configuration for {}.", environment),
                    )),
                }
            } else {
                output.section("DEPLOYMENT FINISHED", bold_green);
                RunReport {
                    exit_code: 0,
                    notification: Some((
                        "Deployment finished".to_string(),
                        format!("Successfully deployed {}.", environment),
                    )),
                }
            }
        }
        Err(err @ ConvoyError::MissingEnvironment { .. }) => {
            err.report(output);
            output.section("CONFIGURATION FAILED", bold_red);
            RunReport {
                exit_code: 1,
                notification: check_failed(check_only, environment, output),
            }
        }
        Err(err @ ConvoyError::Configuration(_)) => {
            err.report(output);
            RunReport {
                exit_code: 1,
                notification: check_failed(check_only, environment, output),
            }
        }
        Err(
            err @ (ConvoyError::Deployment { .. }
            | ConvoyError::NoReferenceHost
            | ConvoyError::Repository(_)),
        ) => {
            err.report(output);
            output.section("DEPLOYMENT FAILED", bold_red);
            RunReport {
                exit_code: 1,
                notification: Some((
                    "Deployment failed".to_string(),
                    format!("{} encountered an error.", environment),
                )),
            }
        }
        Err(other) => {
            output.error(&format!("Unexpected error: {}", other));
            output.annotate(&format!("{:?}", other), Style::red());
            output.section("DEPLOYMENT FAILED", bold_red);
            RunReport {
                exit_code: 1,
                notification: Some(("Deployment failed".to_string(), String::new())),
            }
        }
    }
}

fn check_failed(
    check_only: bool,
    environment: &str,
    output: &dyn OutputSink,
) -> Option<(String, String)> {
    if !check_only {
        return None;
    }
    output.section(
        "CHECK FAILED",
        Style {
            bold: true,
            ..Style::red()
        },
    );
    Some((
        "Deployment check finished".to_string(),
        format!("Configuration for {} encountered an error.", environment),
    ))
}

/// Driver entry point: lock, run the phases, always disconnect, classify.
/// Returns the process exit code.
pub fn run(options: DeployOptions) -> i32 {
    let output = TerminalOutput::new(options.verbose);
    output.line(&lock::self_id(), Style::default());

    let _lock = match DeployLock::acquire(Path::new(lock::LOCK_FILE), &output) {
        Ok(lock) => lock,
        Err(err) => return finish(&Err(err), &options, &output),
    };

    let repository = match GitRsyncRepository::from_cwd(options.dirty, options.fast) {
        Ok(repository) => repository,
        Err(err) => return finish(&Err(err), &options, &output),
    };

    let transport = ProcessTransport;
    let mut deployment = Deployment::new(options.clone(), &repository, &transport, &output);
    let outcome = deployment.execute();
    deployment.disconnect();
    finish(&outcome, &options, &output)
}

fn finish(outcome: &ConvoyResult<()>, options: &DeployOptions, output: &dyn OutputSink) -> i32 {
    let report = conclude(outcome, &options.environment, options.check_only, output);
    if let Some((summary, body)) = &report.notification {
        notify::notify(summary, body);
    }
    report.exit_code
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SectionLog {
        sections: Arc<Mutex<Vec<String>>>,
    }

    impl OutputSink for SectionLog {
        fn line(&self, _m: &str, _s: Style) {}

        fn section(&self, title: &str, _style: Style) {
            self.sections.lock().unwrap().push(title.to_string());
        }

        fn step(&self, _c: &str, _m: &str, _s: Style) {}
        fn annotate(&self, _m: &str, _s: Style) {}
        fn error(&self, _m: &str) {}
    }

    fn sections(log: &SectionLog) -> Vec<String> {
        log.sections.lock().unwrap().clone()
    }

    #[test]
    fn conclude_success_full_run() {
        let log = SectionLog::default();
        let report = conclude(&Ok(()), "production", false, &log);
        assert_eq!(report.exit_code, 0);
        assert_eq!(sections(&log), vec!["DEPLOYMENT FINISHED"]);
        let (summary, body) = report.notification.unwrap();
        assert_eq!(summary, "Deployment finished");
        assert_eq!(body, "Successfully deployed production.");
    }

    #[test]
    fn conclude_success_check_only() {
        let log = SectionLog::default();
        let report = conclude(&Ok(()), "production", true, &log);
        assert_eq!(report.exit_code, 0);
        assert_eq!(sections(&log), vec!["CHECK FINISHED"]);
        let (summary, body) = report.notification.unwrap();
        assert_eq!(summary, "Deployment check finished");
        assert_eq!(body, "Successfully checked configuration for production.");
    }

    #[test]
    fn conclude_missing_environment_reports_and_fails() {
        let log = SectionLog::default();
        let outcome = Err(ConvoyError::MissingEnvironment {
            name: "qa".to_string(),
            search: PathBuf::from("environments"),
            known: vec![],
        });
        let report = conclude(&outcome, "qa", false, &log);
        assert_eq!(report.exit_code, 1);
        assert_eq!(sections(&log), vec!["CONFIGURATION FAILED"]);
        assert!(report.notification.is_none());
    }

    #[test]
    fn conclude_missing_environment_check_only_adds_check_failed() {
        let log = SectionLog::default();
        let outcome = Err(ConvoyError::MissingEnvironment {
            name: "qa".to_string(),
            search: PathBuf::from("environments"),
            known: vec![],
        });
        let report = conclude(&outcome, "qa", true, &log);
        assert_eq!(report.exit_code, 1);
        assert_eq!(sections(&log), vec!["CONFIGURATION FAILED", "CHECK FAILED"]);
        let (summary, body) = report.notification.unwrap();
        assert_eq!(summary, "Deployment check finished");
        assert_eq!(body, "Configuration for qa encountered an error.");
    }

    #[test]
    fn conclude_deployment_error_notifies_with_environment() {
        let log = SectionLog::default();
        let outcome = Err(ConvoyError::Deployment {
            host: "web1".to_string(),
        });
        let report = conclude(&outcome, "production", false, &log);
        assert_eq!(report.exit_code, 1);
        assert_eq!(sections(&log), vec!["DEPLOYMENT FAILED"]);
        let (summary, body) = report.notification.unwrap();
        assert_eq!(summary, "Deployment failed");
        assert_eq!(body, "production encountered an error.");
    }

    #[test]
    fn conclude_no_reference_host_is_a_deployment_failure() {
        let log = SectionLog::default();
        let report = conclude(&Err(ConvoyError::NoReferenceHost), "production", false, &log);
        assert_eq!(report.exit_code, 1);
        assert_eq!(sections(&log), vec!["DEPLOYMENT FAILED"]);
        assert!(report.notification.is_some());
    }

    #[test]
    fn conclude_unexpected_error_notifies_without_body() {
        let log = SectionLog::default();
        let outcome = Err(ConvoyError::Protocol("unknown message tag 'x'".to_string()));
        let report = conclude(&outcome, "production", false, &log);
        assert_eq!(report.exit_code, 1);
        assert_eq!(sections(&log), vec!["DEPLOYMENT FAILED"]);
        let (summary, body) = report.notification.unwrap();
        assert_eq!(summary, "Deployment failed");
        assert_eq!(body, "");
    }

    #[test]
    fn connection_sequence_remaining_counts_down() {
        let sequence = ConnectionSequence::new(3);
        assert_eq!(sequence.remaining(), 3);
    }
}
