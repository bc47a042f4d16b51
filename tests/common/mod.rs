//! Shared fixtures: an in-memory terraform stand-in and sequencer builders.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use infra_cutover::external::{CommandError, CommandExecutor, CommandInvocation, CommandOutput};
use infra_cutover::{CutoverConfig, Sequencer, ShutdownSignal, ShutdownTrigger};

pub const OLD: &str = "web-2026-01";
pub const NEW: &str = "web-2026-10";
pub const IP: &str = "203.0.113.10";

struct InjectedFailure {
    pattern: String,
    remaining: u32,
    status_code: i32,
    stdout: String,
    stderr: String,
}

struct FakeState {
    selected: String,
    workspaces: Vec<String>,
    ip: String,
    ignore_select: bool,
    failures: Vec<InjectedFailure>,
    interrupt_on: Option<String>,
    destroyed: Vec<String>,
    log: Vec<String>,
}

/// Simulates the terraform CLI (and accepts any playbook run) in memory.
pub struct FakeTerraform {
    state: Mutex<FakeState>,
    trigger: Mutex<Option<ShutdownTrigger>>,
}

impl FakeTerraform {
    /// Backend with `default` and the old workspace, old one selected.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                selected: OLD.to_string(),
                workspaces: vec!["default".to_string(), OLD.to_string()],
                ip: IP.to_string(),
                ignore_select: false,
                failures: Vec::new(),
                interrupt_on: None,
                destroyed: Vec::new(),
                log: Vec::new(),
            }),
            trigger: Mutex::new(None),
        })
    }

    pub fn set_ip(&self, ip: &str) {
        self.state.lock().unwrap().ip = ip.to_string();
    }

    /// `workspace select` reports success but changes nothing.
    pub fn ignore_select(&self, ignore: bool) {
        self.state.lock().unwrap().ignore_select = ignore;
    }

    pub fn add_workspace(&self, name: &str) {
        self.state.lock().unwrap().workspaces.push(name.to_string());
    }

    /// The next `times` commands containing `pattern` exit non-zero.
    pub fn fail_on(&self, pattern: &str, times: u32, stdout: &str, stderr: &str) {
        self.state.lock().unwrap().failures.push(InjectedFailure {
            pattern: pattern.to_string(),
            remaining: times,
            status_code: 1,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        });
    }

    /// The first command containing `pattern` fires the shutdown trigger and
    /// never completes.
    pub fn interrupt_on(&self, pattern: &str, trigger: ShutdownTrigger) {
        self.state.lock().unwrap().interrupt_on = Some(pattern.to_string());
        *self.trigger.lock().unwrap() = Some(trigger);
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.log().iter().filter(|line| line.contains(pattern)).count()
    }

    pub fn workspaces(&self) -> Vec<String> {
        self.state.lock().unwrap().workspaces.clone()
    }

    pub fn destroyed(&self) -> Vec<String> {
        self.state.lock().unwrap().destroyed.clone()
    }

    pub fn selected(&self) -> String {
        self.state.lock().unwrap().selected.clone()
    }
}

fn ok(stdout: impl Into<String>) -> CommandOutput {
    CommandOutput {
        status_code: 0,
        stdout: stdout.into(),
        stderr: String::new(),
    }
}

fn fail(stderr: impl Into<String>) -> CommandOutput {
    CommandOutput {
        status_code: 1,
        stdout: String::new(),
        stderr: stderr.into(),
    }
}

impl FakeState {
    fn respond(&mut self, invocation: &CommandInvocation) -> CommandOutput {
        if invocation.program != "terraform" {
            return ok(format!("PLAY RECAP {}\n", invocation.command_line()));
        }
        let args: Vec<&str> = invocation.args.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["init", ..] => ok("Terraform has been successfully initialized!\n"),
            ["workspace", "new", name] => {
                if self.workspaces.iter().any(|w| w == name) {
                    fail(format!("Workspace \"{name}\" already exists\n"))
                } else {
                    self.workspaces.push(name.to_string());
                    self.selected = name.to_string();
                    ok(format!("Created and switched to workspace \"{name}\"!\n"))
                }
            }
            ["workspace", "select", name] => {
                if !self.workspaces.iter().any(|w| w == name) {
                    fail(format!("Workspace \"{name}\" doesn't exist.\n"))
                } else {
                    if !self.ignore_select {
                        self.selected = name.to_string();
                    }
                    ok(format!("Switched to workspace \"{name}\".\n"))
                }
            }
            ["workspace", "show"] => ok(format!("{}\n", self.selected)),
            ["workspace", "list"] => ok(self
                .workspaces
                .iter()
                .map(|w| {
                    if *w == self.selected {
                        format!("* {w}\n")
                    } else {
                        format!("  {w}\n")
                    }
                })
                .collect::<String>()),
            ["workspace", "delete", name] => {
                if self.selected == *name {
                    fail(format!("Workspace \"{name}\" is your active workspace.\n"))
                } else {
                    self.workspaces.retain(|w| w != name);
                    ok(format!("Deleted workspace \"{name}\"!\n"))
                }
            }
            ["apply", ..] => ok("Apply complete! Resources: 3 added, 0 changed, 0 destroyed.\n"),
            ["output", "-raw", _] => ok(self.ip.clone()),
            ["destroy", ..] => {
                let selected = self.selected.clone();
                self.destroyed.push(selected);
                ok("Destroy complete! Resources: 3 destroyed.\n")
            }
            _ => fail(format!("unsupported: {}\n", invocation.command_line())),
        }
    }
}

#[async_trait]
impl CommandExecutor for FakeTerraform {
    async fn execute(&self, invocation: &CommandInvocation) -> Result<CommandOutput, CommandError> {
        let line = invocation.command_line();
        let interrupt = {
            let mut state = self.state.lock().unwrap();
            state.log.push(line.clone());
            match &state.interrupt_on {
                Some(pattern) if line.contains(pattern.as_str()) => {
                    state.interrupt_on = None;
                    true
                }
                _ => false,
            }
        };

        if interrupt {
            if let Some(trigger) = self.trigger.lock().unwrap().take() {
                trigger.trigger();
            }
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(failure) = state
            .failures
            .iter_mut()
            .find(|f| f.remaining > 0 && line.contains(f.pattern.as_str()))
        {
            failure.remaining -= 1;
            return Ok(CommandOutput {
                status_code: failure.status_code,
                stdout: failure.stdout.clone(),
                stderr: failure.stderr.clone(),
            });
        }
        Ok(state.respond(invocation))
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub fake: Arc<FakeTerraform>,
    pub config: CutoverConfig,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = CutoverConfig::default();
        config.state.directory = dir.path().join("state");
        Self {
            dir,
            fake: FakeTerraform::new(),
            config,
        }
    }

    pub fn sequencer(&self) -> Sequencer {
        Sequencer::new(self.fake.clone(), self.config.clone())
    }

    pub fn sequencer_with_shutdown(&self, shutdown: ShutdownSignal) -> Sequencer {
        self.sequencer().with_shutdown(shutdown)
    }

    /// Drives a fresh run up to `CutoverConfirmed`.
    pub async fn cut_over(&self) -> Sequencer {
        let sequencer = self.sequencer();
        sequencer.init(NEW, Some(OLD)).await.unwrap();
        sequencer.provision(NEW).await.unwrap();
        sequencer.verify(NEW, Some(IP)).await.unwrap();
        sequencer.cutover(NEW).await.unwrap();
        sequencer
    }
}
