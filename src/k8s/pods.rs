use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, LogParams, PostParams};
use kube::Client;

use crate::errors::{Error, Result};
use crate::exec::{LogStream, PodApi, PodPhase, PodState, LOG_TAIL_LINES};
use crate::k8s::{kube_error, manifests};
use crate::spec::PodSpec;

/// `PodApi` backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubePods {
    client: Client,
}

impl KubePods {
    pub fn new(client: Client) -> Self {
        KubePods { client }
    }

    fn api(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

pub fn pod_state(pod: &Pod) -> PodState {
    let status = pod.status.as_ref();
    let exit_codes = status
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| {
            statuses
                .iter()
                .filter_map(|cs| cs.state.as_ref()?.terminated.as_ref())
                .map(|terminated| terminated.exit_code)
                .collect()
        })
        .unwrap_or_default();

    PodState {
        phase: PodPhase::parse(status.and_then(|s| s.phase.as_deref())),
        exit_codes,
    }
}

#[async_trait]
impl PodApi for KubePods {
    async fn create(&self, spec: &PodSpec) -> Result<()> {
        let pod: Pod = serde_json::from_value(manifests::pod(spec))?;
        self.api(&spec.namespace)
            .create(&PostParams::default(), &pod)
            .await
            .map_err(kube_error("create_pod"))?;
        Ok(())
    }

    async fn state(&self, namespace: &str, name: &str) -> Result<PodState> {
        let pod = self
            .api(namespace)
            .get(name)
            .await
            .map_err(kube_error("get_pod"))?;
        Ok(pod_state(&pod))
    }

    async fn logs(&self, namespace: &str, name: &str) -> Result<LogStream> {
        let params = LogParams {
            follow: true,
            tail_lines: Some(LOG_TAIL_LINES),
            ..LogParams::default()
        };
        let stream = self
            .api(namespace)
            .log_stream(name, &params)
            .await
            .map_err(kube_error("pod_logs"))?;
        Ok(stream.map_err(Error::from).boxed())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        self.api(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(kube_error("delete_pod"))?;
        Ok(())
    }
}
