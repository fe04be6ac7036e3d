//! Run one-shot pods to completion.
//!
//! A pod goes through Created -> Starting -> Running -> Terminated -> Reaped. State is
//! observed by polling the pod, logs are streamed while waiting for it to terminate, and
//! the exit code is delivered once on a single-slot channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;

use crate::errors::{Error, Result};
use crate::metrics;
use crate::spec::PodSpec;

pub mod output;
pub mod poll;

pub use output::{pipe, Output, OutputReader};
use poll::{poll_until, Check, PollError};

/// Lines of log backlog fetched when attaching to a pod.
pub const LOG_TAIL_LINES: i64 = 10;

pub type LogStream = BoxStream<'static, Result<Bytes>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

impl Default for PodPhase {
    fn default() -> Self {
        PodPhase::Unknown
    }
}

/// The bits of a pod's status the engine cares about.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PodState {
    pub phase: PodPhase,
    /// Exit codes of the containers that have terminated.
    pub exit_codes: Vec<i32>,
}

impl PodState {
    /// First non-zero exit code. A failed pod without one still exits with 1.
    pub fn exit_code(&self) -> i32 {
        match self.exit_codes.iter().copied().find(|code| *code != 0) {
            Some(code) => code,
            None if self.phase == PodPhase::Failed => 1,
            None => 0,
        }
    }
}

/// Raw pod operations of the cluster.
#[async_trait]
pub trait PodApi: Send + Sync {
    async fn create(&self, pod: &PodSpec) -> Result<()>;

    async fn state(&self, namespace: &str, name: &str) -> Result<PodState>;

    /// Follow the logs of a started pod; the stream ends when the pod terminates.
    async fn logs(&self, namespace: &str, name: &str) -> Result<LogStream>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("timed out waiting for pod {0}")]
    Timeout(String),

    #[error("pod {0} failed")]
    Failed(String),

    #[error("cluster error: {0}")]
    Cluster(#[source] Error),

    #[error("pod run cancelled")]
    Cancelled,

    #[error("pod run ended without reporting a result")]
    Aborted,
}

impl RunError {
    pub fn kind(&self) -> &'static str {
        match self {
            RunError::Timeout(_) => "timeout",
            RunError::Failed(_) => "failed",
            RunError::Cluster(_) => "cluster",
            RunError::Cancelled => "cancelled",
            RunError::Aborted => "aborted",
        }
    }
}

/// Exit code of the pod, or why none could be observed.
pub type RunResult<T = i32> = std::result::Result<T, RunError>;

/// A pod run in progress: its live output and its eventual outcome.
pub struct PodRun {
    pub output: OutputReader,
    pub status: oneshot::Receiver<RunResult>,
}

impl PodRun {
    /// Copy the pod output into `out` while waiting for the outcome.
    pub async fn stream_into(self, out: &mut Output) -> RunResult {
        let PodRun { mut output, status } = self;
        let (copied, status) = tokio::join!(out.copy_from(&mut output), status);
        if let Err(err) = copied {
            debug!("Stopped copying pod output: {}", err);
        }
        status.unwrap_or(Err(RunError::Aborted))
    }
}

#[derive(Clone, Debug)]
pub struct RunSettings {
    pub poll_interval: Duration,
    /// Upper bound for each of the start and end waits.
    pub timeout: Duration,
    /// How long to keep copying logs once the pod has terminated.
    pub log_drain_timeout: Duration,
}

impl Default for RunSettings {
    fn default() -> Self {
        RunSettings {
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(5 * 60),
            log_drain_timeout: Duration::from_secs(30),
        }
    }
}

pub struct PodRunner<P> {
    pods: Arc<P>,
    settings: RunSettings,
}

impl<P> Clone for PodRunner<P> {
    fn clone(&self) -> Self {
        PodRunner {
            pods: Arc::clone(&self.pods),
            settings: self.settings.clone(),
        }
    }
}

impl<P: PodApi + 'static> PodRunner<P> {
    pub fn new(pods: Arc<P>, settings: RunSettings) -> Self {
        PodRunner { pods, settings }
    }

    /// Submit `spec` and follow the pod in the background.
    ///
    /// Returns at once. The output closes when the run ends, and `status` receives exactly
    /// one value. Cancelling `cancel` stops the waits and deletes the pod.
    pub fn run(&self, spec: PodSpec, cancel: CancellationToken) -> PodRun {
        let (reader, writer) = pipe();
        let (tx, rx) = oneshot::channel();
        let pods = Arc::clone(&self.pods);
        let settings = self.settings.clone();

        tokio::spawn(async move {
            let name = spec.name.clone();
            let result = run_pod(pods, spec, writer, settings, cancel).await;
            match &result {
                Ok(code) => info!("Pod {} terminated with exit code {}", name, code),
                Err(err) => warn!("Pod {} did not run to completion: {}", name, err),
            }
            metrics::pod_run_finished(&result);
            if tx.send(result).is_err() {
                debug!("Nobody is waiting for the result of pod {}", name);
            }
        });

        PodRun {
            output: reader,
            status: rx,
        }
    }
}

async fn run_pod<P: PodApi + 'static>(
    pods: Arc<P>,
    spec: PodSpec,
    output: Output,
    settings: RunSettings,
    cancel: CancellationToken,
) -> RunResult {
    let namespace = spec.namespace.clone();
    let name = spec.name.clone();

    if cancel.is_cancelled() {
        return Err(RunError::Cancelled);
    }
    pods.create(&spec).await.map_err(RunError::Cluster)?;
    debug!("Created pod {}/{}", namespace, name);

    let attempt = async {
        wait_start(&*pods, &namespace, &name, &settings).await?;

        let mut logs = AbortOnDropHandle::new(spawn_log_copy(
            Arc::clone(&pods),
            namespace.clone(),
            name.clone(),
            output,
        ));
        wait_end(&*pods, &namespace, &name, &settings).await?;

        if tokio::time::timeout(settings.log_drain_timeout, &mut logs)
            .await
            .is_err()
        {
            warn!("Gave up on the logs of pod {} after it terminated", name);
        }
        Ok::<_, RunError>(exit_code(&*pods, &namespace, &name).await)
    };

    let result = tokio::select! {
        result = attempt => result,
        _ = cancel.cancelled() => Err(RunError::Cancelled),
    };

    match result {
        Ok(_) | Err(RunError::Cancelled) => reap(pods, namespace, name),
        Err(_) => info!("Leaving pod {}/{} in place for inspection", namespace, name),
    }
    result
}

fn run_error(err: PollError<Error>, name: &str) -> RunError {
    match err {
        PollError::Timeout => RunError::Timeout(name.to_string()),
        PollError::Failed => RunError::Failed(name.to_string()),
        PollError::Check(err) => RunError::Cluster(err),
    }
}

async fn wait_start<P: PodApi + ?Sized>(
    pods: &P,
    namespace: &str,
    name: &str,
    settings: &RunSettings,
) -> RunResult<()> {
    poll_until(settings.poll_interval, settings.timeout, move || async move {
        let state = pods.state(namespace, name).await?;
        Ok::<_, Error>(match state.phase {
            PodPhase::Running | PodPhase::Succeeded => Check::Done,
            PodPhase::Failed => Check::Failed,
            PodPhase::Pending | PodPhase::Unknown => Check::Pending,
        })
    })
    .await
    .map_err(|err| run_error(err, name))
}

async fn wait_end<P: PodApi + ?Sized>(
    pods: &P,
    namespace: &str,
    name: &str,
    settings: &RunSettings,
) -> RunResult<()> {
    poll_until(settings.poll_interval, settings.timeout, move || async move {
        let state = pods.state(namespace, name).await?;
        Ok::<_, Error>(match state.phase {
            PodPhase::Succeeded | PodPhase::Failed => Check::Done,
            _ => Check::Pending,
        })
    })
    .await
    .map_err(|err| run_error(err, name))
}

async fn exit_code<P: PodApi + ?Sized>(pods: &P, namespace: &str, name: &str) -> i32 {
    match pods.state(namespace, name).await {
        Ok(state) => state.exit_code(),
        Err(err) => {
            warn!("Unable to read the exit code of pod {}: {}", name, err);
            1
        }
    }
}

fn spawn_log_copy<P: PodApi + 'static>(
    pods: Arc<P>,
    namespace: String,
    name: String,
    mut output: Output,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut logs = match pods.logs(&namespace, &name).await {
            Ok(logs) => logs,
            Err(err) => {
                warn!("Unable to attach to the logs of pod {}: {}", name, err);
                return;
            }
        };
        while let Some(chunk) = logs.next().await {
            match chunk {
                Ok(bytes) => {
                    if let Err(err) = output.write(&bytes).await {
                        debug!("Stopped streaming logs of pod {}: {}", name, err);
                        break;
                    }
                }
                Err(err) => {
                    warn!("Log stream of pod {} broke: {}", name, err);
                    break;
                }
            }
        }
    })
}

fn reap<P: PodApi + 'static>(pods: Arc<P>, namespace: String, name: String) {
    tokio::spawn(async move {
        match pods.delete(&namespace, &name).await {
            Ok(()) => debug!("Deleted pod {}/{}", namespace, name),
            Err(err) => warn!("Failed to delete pod {}/{}: {}", namespace, name, err),
        }
    });
}
