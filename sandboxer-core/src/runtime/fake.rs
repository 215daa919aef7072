//! In-memory runtime that records every call

use super::{CreateSpec, ExecOutput, RuntimeAdapter, SandboxRecord, Signal};
use crate::error::{Result, SandboxError};
use crate::labels::{self, ManagementLabels};
use async_trait::async_trait;
use sandboxer_net::{NetworkMode, Ruleset};
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Create(String),
    Inspect(String),
    List,
    Start(String),
    Signal(String, Signal),
    Remove(String, bool),
    Attach(String),
    Exec(String, Vec<String>),
    EnsureImage(String),
    ApplyRuleset(String, usize),
}

#[derive(Debug, Clone)]
pub(crate) struct FakeContainer {
    pub id: String,
    pub state: String,
    pub labels: BTreeMap<String, String>,
    pub ignores_term: bool,
    pub files: BTreeMap<String, String>,
    pub spec: Option<CreateSpec>,
}

#[derive(Default)]
struct State {
    containers: BTreeMap<String, FakeContainer>,
    calls: Vec<Call>,
    /// Container (name, state, labels) that appears the moment `create` is
    /// called for it, emulating a concurrent `run`
    race_on_create: Option<(String, String, BTreeMap<String, String>)>,
    fail_apply: bool,
    next_id: usize,
}

#[derive(Default)]
pub(crate) struct FakeRuntime {
    state: Mutex<State>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn insert(&self, name: &str, state: &str, labels: BTreeMap<String, String>) {
        self.with(|s| {
            s.next_id += 1;
            let id = format!("{:0>64}", s.next_id);
            s.containers.insert(
                name.to_string(),
                FakeContainer {
                    id,
                    state: state.to_string(),
                    labels,
                    ignores_term: false,
                    files: BTreeMap::new(),
                    spec: None,
                },
            );
        });
    }

    /// A managed, running, open-mode sandbox
    pub fn add_running(&self, name: &str, path: &str) {
        let labels = ManagementLabels::new(path.into(), NetworkMode::Open, "img", None)
            .to_map()
            .unwrap();
        self.insert(name, "running", labels);
    }

    pub fn ignore_term(&self, name: &str) {
        self.with(|s| {
            if let Some(c) = s.containers.get_mut(name) {
                c.ignores_term = true;
            }
        });
    }

    pub fn race_on_create(&self, name: &str, state: &str, labels: BTreeMap<String, String>) {
        self.with(|s| s.race_on_create = Some((name.to_string(), state.to_string(), labels)));
    }

    pub fn fail_apply(&self) {
        self.with(|s| s.fail_apply = true);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.with(|s| s.calls.clone())
    }

    /// Calls other than reads
    pub fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::Inspect(_) | Call::List))
            .collect()
    }

    pub fn signals(&self, name: &str) -> Vec<Signal> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Signal(n, sig) if n == name => Some(sig),
                _ => None,
            })
            .collect()
    }

    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        self.with(|s| s.containers.get(name).cloned())
    }

    fn record(&self, call: Call) {
        self.with(|s| s.calls.push(call));
    }

    fn not_found(name: &str) -> SandboxError {
        SandboxError::NotFound {
            name: name.to_string(),
        }
    }
}

fn to_record(name: &str, c: &FakeContainer) -> SandboxRecord {
    SandboxRecord {
        id: c.id.clone(),
        name: name.to_string(),
        state: c.state.clone(),
        labels: c.labels.clone(),
    }
}

#[async_trait]
impl RuntimeAdapter for FakeRuntime {
    async fn create(&self, spec: &CreateSpec) -> Result<String> {
        self.record(Call::Create(spec.name.clone()));

        let raced = self.with(|s| match s.race_on_create.take() {
            Some((name, state, labels)) if name == spec.name => Some((state, labels)),
            other => {
                s.race_on_create = other;
                None
            }
        });
        if let Some((state, labels)) = raced {
            self.insert(&spec.name, &state, labels);
        }

        if self.with(|s| s.containers.contains_key(&spec.name)) {
            return Err(SandboxError::AlreadyExists {
                name: spec.name.clone(),
            });
        }

        self.insert(&spec.name, "created", spec.labels.clone());
        self.with(|s| {
            let c = s.containers.get_mut(&spec.name).unwrap();
            c.spec = Some(spec.clone());
            Ok(c.id.clone())
        })
    }

    async fn inspect(&self, name: &str) -> Result<Option<SandboxRecord>> {
        self.record(Call::Inspect(name.to_string()));
        Ok(self.with(|s| {
            s.containers
                .get(name)
                .filter(|c| labels::is_managed(&c.labels))
                .map(|c| to_record(name, c))
        }))
    }

    async fn list_managed(&self) -> Result<Vec<SandboxRecord>> {
        self.record(Call::List);
        let all = self.with(|s| {
            s.containers
                .iter()
                .map(|(name, c)| to_record(name, c))
                .collect()
        });
        Ok(super::managed_only(all))
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.record(Call::Start(name.to_string()));
        self.with(|s| match s.containers.get_mut(name) {
            Some(c) => {
                c.state = "running".to_string();
                Ok(())
            }
            None => Err(Self::not_found(name)),
        })
    }

    async fn signal(&self, name: &str, signal: Signal) -> Result<()> {
        self.record(Call::Signal(name.to_string(), signal));
        self.with(|s| match s.containers.get_mut(name) {
            Some(c) if c.state != "running" => Err(SandboxError::NotRunning {
                name: name.to_string(),
                operation: "signal",
            }),
            Some(c) => {
                if signal == Signal::Kill || !c.ignores_term {
                    c.state = "exited".to_string();
                }
                Ok(())
            }
            None => Err(Self::not_found(name)),
        })
    }

    async fn remove(&self, name: &str, force: bool) -> Result<()> {
        self.record(Call::Remove(name.to_string(), force));
        self.with(|s| {
            let running = match s.containers.get(name) {
                Some(c) => c.state == "running",
                None => return Err(Self::not_found(name)),
            };
            if running && !force {
                return Err(SandboxError::operation_failed(
                    name,
                    "remove",
                    "container is running",
                ));
            }
            s.containers.remove(name);
            Ok(())
        })
    }

    async fn attach(&self, name: &str) -> Result<i32> {
        self.record(Call::Attach(name.to_string()));
        Ok(0)
    }

    async fn exec(&self, name: &str, argv: &[&str], stdin: Option<&str>) -> Result<ExecOutput> {
        self.record(Call::Exec(
            name.to_string(),
            argv.iter().map(|a| a.to_string()).collect(),
        ));

        // Understands the two shapes the orchestrator issues: `cat <file>`
        // and `sh -c '... cat > <file>'` with the content on stdin
        self.with(|s| -> Result<ExecOutput> {
            let c = s
                .containers
                .get_mut(name)
                .ok_or_else(|| Self::not_found(name))?;
            let script = argv.last().copied().unwrap_or_default();
            match (argv.first().copied(), stdin) {
                (Some("cat"), None) => Ok(match c.files.get(script) {
                    Some(content) => ExecOutput {
                        status: 0,
                        stdout: content.clone(),
                        stderr: String::new(),
                    },
                    None => ExecOutput {
                        status: 1,
                        stdout: String::new(),
                        stderr: "No such file or directory".into(),
                    },
                }),
                (_, Some(input)) => {
                    let path = script.rsplit("> ").next().unwrap_or_default();
                    c.files.insert(path.to_string(), input.to_string());
                    Ok(ExecOutput::default())
                }
                _ => Ok(ExecOutput::default()),
            }
        })
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        self.record(Call::EnsureImage(image.to_string()));
        Ok(())
    }

    async fn apply_ruleset(&self, name: &str, _image: &str, ruleset: &Ruleset) -> Result<()> {
        self.record(Call::ApplyRuleset(
            name.to_string(),
            ruleset.destination_rule_count(),
        ));
        if self.with(|s| s.fail_apply) {
            return Err(SandboxError::operation_failed(
                name,
                "apply network rules to",
                "iptables-restore: permission denied",
            ));
        }
        Ok(())
    }
}
