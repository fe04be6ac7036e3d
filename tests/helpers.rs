#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use futures::StreamExt;
use tokio::io::AsyncReadExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use slug_controller::app::{App, AppOperations, ProcessType, User};
use slug_controller::deploy::{ArchiveParser, DeployHandle, Options, ReplicaSetListItem};
use slug_controller::errors::{Error, Result};
use slug_controller::exec::{pipe, LogStream, Output, PodApi, PodPhase, PodRun, PodState, RunError};
use slug_controller::k8s::ClusterGateway;
use slug_controller::manifest::{AppManifest, CronSchedule, DeployConfigFiles, Procfile};
use slug_controller::spec::{ContainerLimits, CronJobSpec, DeploySpec, PodSpec};
use slug_controller::storage::Storage;
use slug_controller::DeployOperations;

pub fn user() -> User {
    User {
        email: "gopher@example.com".to_string(),
        name: "gopher".to_string(),
    }
}

pub fn app(name: &str, process_type: ProcessType) -> App {
    App {
        name: name.to_string(),
        process_type,
        virtual_host: format!("{}.example.com", name),
        ..App::default()
    }
}

pub fn options() -> Options {
    Options {
        slug_builder_image: "builder".to_string(),
        slug_runner_image: "runner".to_string(),
        slug_store_image: "store".to_string(),
        build_limits: ContainerLimits {
            cpu: "800m".to_string(),
            memory: "1Gi".to_string(),
        },
        revision_history_limit: 5,
    }
}

pub fn procfile(entries: &[(&str, &str)]) -> DeployConfigFiles {
    DeployConfigFiles {
        procfile: Some(entries.iter().copied().collect::<Procfile>()),
        manifest: None,
    }
}

pub fn cron_config(schedule: &str, command: &str) -> DeployConfigFiles {
    DeployConfigFiles {
        procfile: Some(vec![("cron", command)].into_iter().collect()),
        manifest: Some(AppManifest {
            cron: Some(CronSchedule {
                schedule: schedule.to_string(),
            }),
            ..AppManifest::default()
        }),
    }
}

/// Read the whole deploy output and wait for its outcome.
pub async fn finish(handle: DeployHandle) -> (String, Result<()>) {
    let mut output = handle.output;
    let mut text = String::new();
    output
        .read_to_string(&mut text)
        .await
        .expect("Unable to read deploy output");
    let outcome = handle.outcome.await.expect("Deploy ended without an outcome");
    (text, outcome)
}

#[derive(Default)]
pub struct FakeApps {
    pub apps: Mutex<HashMap<String, App>>,
    pub denied: bool,
    pub save_fails: bool,
    pub saved: Mutex<Vec<(String, String)>>,
}

impl FakeApps {
    pub fn with(apps: Vec<App>) -> Self {
        FakeApps {
            apps: Mutex::new(apps.into_iter().map(|a| (a.name.clone(), a)).collect()),
            ..FakeApps::default()
        }
    }
}

#[async_trait]
impl AppOperations for FakeApps {
    async fn get(&self, name: &str) -> Result<App> {
        self.apps
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("App {}", name)))
    }

    async fn team_name(&self, _name: &str) -> Result<String> {
        Ok("luizalabs".to_string())
    }

    async fn has_permission(&self, _user: &User, _name: &str) -> bool {
        !self.denied
    }

    async fn check_perm_and_get(&self, user: &User, name: &str) -> Result<App> {
        if !self.has_permission(user, name).await {
            return Err(Error::PermissionDenied);
        }
        self.get(name).await
    }

    async fn save_app(&self, app: &App, last_user: &str) -> Result<()> {
        if self.save_fails {
            return Err(Error::Storage("database is down".to_string()));
        }
        self.saved
            .lock()
            .unwrap()
            .push((app.name.clone(), last_user.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeStorage {
    pub fail: bool,
    pub uploads: Mutex<Vec<String>>,
}

#[async_trait]
impl Storage for FakeStorage {
    fn storage_type(&self) -> &str {
        "s3"
    }

    fn access_secret_name(&self) -> &str {
        "s3-keys"
    }

    async fn upload_file(&self, path: &str, _file: Bytes) -> Result<()> {
        if self.fail {
            return Err(Error::Storage("bucket not found".to_string()));
        }
        self.uploads.lock().unwrap().push(path.to_string());
        Ok(())
    }
}

/// Returns `files` for any archive, or a parse error when there are none.
pub struct FakeParser(pub Option<DeployConfigFiles>);

impl ArchiveParser for FakeParser {
    fn config_files(
        &self,
        _archive: &[u8],
        _process_type: ProcessType,
    ) -> std::result::Result<DeployConfigFiles, Box<dyn std::error::Error + Send + Sync>> {
        self.0.clone().ok_or_else(|| "Procfile is not valid yaml".into())
    }
}

/// How a fake one-shot pod ends.
#[derive(Clone, Copy, Debug)]
pub enum PodScript {
    Exit(i32),
    Timeout,
    /// Runs until the deploy is cancelled.
    Hang,
}

#[derive(Clone, Debug)]
pub enum Call {
    PodRun(PodSpec),
    Deploy(DeploySpec),
    CronJob(CronJobSpec),
    Expose { namespace: String, name: String, vhost: String },
    List { namespace: String, label: String, value: String },
    Rollback { namespace: String, name: String, revision: String },
}

/// Records every call and answers with scripted results.
#[derive(Default)]
pub struct FakeGateway {
    pub calls: Mutex<Vec<Call>>,
    /// Pod outcome by role, the pod name prefix (`build`, `release`).
    pub pods: HashMap<String, PodScript>,
    pub deploy_fails: bool,
    pub cron_fails: bool,
    pub expose_fails: bool,
    pub rollback_fails: bool,
    pub revisions: Vec<ReplicaSetListItem>,
}

impl FakeGateway {
    pub fn with_pod(mut self, role: &str, script: PodScript) -> Self {
        self.pods.insert(role.to_string(), script);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn pod_names(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::PodRun(spec) => Some(spec.name),
                _ => None,
            })
            .collect()
    }

    pub fn deploys(&self) -> Vec<DeploySpec> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Deploy(spec) => Some(spec),
                _ => None,
            })
            .collect()
    }

    pub fn cron_jobs(&self) -> Vec<CronJobSpec> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::CronJob(spec) => Some(spec),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn cluster_down() -> Error {
    Error::Storage("cluster is down".to_string())
}

#[async_trait]
impl ClusterGateway for FakeGateway {
    async fn create_or_update_deploy(&self, spec: &DeploySpec) -> Result<()> {
        self.record(Call::Deploy(spec.clone()));
        if self.deploy_fails {
            return Err(cluster_down());
        }
        Ok(())
    }

    async fn create_or_update_cron_job(&self, spec: &CronJobSpec) -> Result<()> {
        self.record(Call::CronJob(spec.clone()));
        if self.cron_fails {
            return Err(cluster_down());
        }
        Ok(())
    }

    fn pod_run(&self, spec: PodSpec, cancel: CancellationToken) -> PodRun {
        let role = spec.name.split('-').next().unwrap_or_default().to_string();
        let script = self.pods.get(&role).copied().unwrap_or(PodScript::Exit(0));
        let name = spec.name.clone();
        self.record(Call::PodRun(spec));

        let (output, mut w) = pipe();
        let (tx, status) = oneshot::channel();
        tokio::spawn(async move {
            w.line(format!("{} output", role)).await;
            let result = match script {
                PodScript::Exit(code) => Ok(code),
                PodScript::Timeout => Err(RunError::Timeout(name)),
                PodScript::Hang => {
                    cancel.cancelled().await;
                    Err(RunError::Cancelled)
                }
            };
            drop(w);
            let _ = tx.send(result);
        });
        PodRun { output, status }
    }

    async fn expose_deploy(&self, namespace: &str, name: &str, vhost: &str, w: &mut Output) -> Result<()> {
        self.record(Call::Expose {
            namespace: namespace.to_string(),
            name: name.to_string(),
            vhost: vhost.to_string(),
        });
        if self.expose_fails {
            return Err(cluster_down());
        }
        w.line("Exposing service").await;
        Ok(())
    }

    async fn replica_set_list_by_label(
        &self,
        namespace: &str,
        label: &str,
        value: &str,
    ) -> Result<Vec<ReplicaSetListItem>> {
        self.record(Call::List {
            namespace: namespace.to_string(),
            label: label.to_string(),
            value: value.to_string(),
        });
        Ok(self.revisions.clone())
    }

    async fn deploy_rollback_to_revision(&self, namespace: &str, name: &str, revision: &str) -> Result<()> {
        self.record(Call::Rollback {
            namespace: namespace.to_string(),
            name: name.to_string(),
            revision: revision.to_string(),
        });
        if self.rollback_fails {
            return Err(Error::RevisionNotFound(revision.to_string()));
        }
        Ok(())
    }
}

pub struct Fixture {
    pub apps: Arc<FakeApps>,
    pub storage: Arc<FakeStorage>,
    pub gateway: Arc<FakeGateway>,
    pub ops: DeployOperations,
}

pub fn fixture(apps: FakeApps, storage: FakeStorage, gateway: FakeGateway, files: Option<DeployConfigFiles>) -> Fixture {
    let apps = Arc::new(apps);
    let storage = Arc::new(storage);
    let gateway = Arc::new(gateway);
    let ops = DeployOperations::new(
        apps.clone(),
        storage.clone(),
        gateway.clone(),
        Arc::new(FakeParser(files)),
        options(),
    );
    Fixture {
        apps,
        storage,
        gateway,
        ops,
    }
}

/// Pod API answering `state` from a script; the last state repeats forever.
#[derive(Default)]
pub struct FakePods {
    pub states: Mutex<VecDeque<PodState>>,
    pub logs: Vec<&'static str>,
    /// Keep the log stream open after the scripted chunks.
    pub logs_stay_open: bool,
    pub create_fails: bool,
    /// Number of state reads that succeed before the API starts failing.
    pub readable_states: Option<usize>,
    pub state_reads: AtomicUsize,
    pub created: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
}

impl FakePods {
    pub fn with_states(states: Vec<PodState>) -> Self {
        FakePods {
            states: Mutex::new(states.into()),
            ..FakePods::default()
        }
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

pub fn state(phase: PodPhase, exit_codes: Vec<i32>) -> PodState {
    PodState { phase, exit_codes }
}

#[async_trait]
impl PodApi for FakePods {
    async fn create(&self, pod: &PodSpec) -> Result<()> {
        if self.create_fails {
            return Err(Error::Storage("quota exceeded".to_string()));
        }
        self.created.lock().unwrap().push(pod.name.clone());
        Ok(())
    }

    async fn state(&self, _namespace: &str, _name: &str) -> Result<PodState> {
        let reads = self.state_reads.fetch_add(1, Ordering::SeqCst);
        if self.readable_states.map_or(false, |readable| reads >= readable) {
            return Err(Error::Storage("apiserver went away".to_string()));
        }
        let mut states = self.states.lock().unwrap();
        let state = if states.len() > 1 {
            states.pop_front()
        } else {
            states.front().cloned()
        };
        state.ok_or_else(|| Error::NotFound("pod".to_string()))
    }

    async fn logs(&self, _namespace: &str, _name: &str) -> Result<LogStream> {
        let chunks: Vec<Result<Bytes>> = self.logs.iter().map(|l| Ok(Bytes::from(*l))).collect();
        if self.logs_stay_open {
            return Ok(stream::iter(chunks).chain(stream::pending()).boxed());
        }
        Ok(stream::iter(chunks).boxed())
    }

    async fn delete(&self, _namespace: &str, name: &str) -> Result<()> {
        self.deleted.lock().unwrap().push(name.to_string());
        Ok(())
    }
}
