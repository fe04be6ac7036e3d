use prometheus::{IntCounterVec, Opts, Registry};

use kube::Error;
use lazy_static::lazy_static;

use crate::errors;
use crate::exec::RunResult;

pub const METRICS_NAMESPACE: &str = "slug_controller";

lazy_static! {
    pub static ref KUBE_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("kube_errors", "slug-controller k8s related errors").namespace(METRICS_NAMESPACE),
        &["action", "kube_name"]
    )
    .unwrap();
    pub static ref DEPLOYS: IntCounterVec = IntCounterVec::new(
        Opts::new("deploys", "slug-controller deploys by outcome").namespace(METRICS_NAMESPACE),
        &["process_type", "outcome"]
    )
    .unwrap();
    pub static ref POD_RUNS: IntCounterVec = IntCounterVec::new(
        Opts::new("pod_runs", "slug-controller one-shot pod runs by outcome").namespace(METRICS_NAMESPACE),
        &["outcome"]
    )
    .unwrap();
}

pub fn custom_metrics(registry: &Registry) -> prometheus::Result<()> {
    registry.register(Box::new(KUBE_ERRORS.clone()))?;
    registry.register(Box::new(DEPLOYS.clone()))?;
    registry.register(Box::new(POD_RUNS.clone()))?;
    Ok(())
}

pub fn kube_error_name(err: &Error) -> &'static str {
    match err {
        Error::Api(_) => "api",
        Error::SerdeError(_) => "serde_error",
        _ => "other",
    }
}

pub fn kube_error_happened(action: &str, err: &errors::Error) {
    let name = match err {
        errors::Error::KubeError(err) => kube_error_name(err),
        other => other.kind(),
    };
    KUBE_ERRORS.with_label_values(&[action, name]).inc();
}

pub fn deploy_finished(process_type: &str, outcome: &errors::Result<()>) {
    let outcome = match outcome {
        Ok(()) => "succeeded",
        Err(err) => err.kind(),
    };
    DEPLOYS.with_label_values(&[process_type, outcome]).inc();
}

pub fn pod_run_finished(result: &RunResult) {
    let outcome = match result {
        Ok(0) => "succeeded",
        Ok(_) => "non_zero_exit",
        Err(err) => err.kind(),
    };
    POD_RUNS.with_label_values(&[outcome]).inc();
}
