//! Cluster gateway: everything the deploy pipeline asks of the cluster.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::deploy::ReplicaSetListItem;
use crate::errors::{Error, Result};
use crate::exec::{Output, PodRun, PodRunner};
use crate::metrics;
use crate::spec::{CronJobSpec, DeploySpec, PodSpec, CHANGE_CAUSE_ANNOTATION, RUN_LABEL};
use crate::utils::annotation;
use crate::Config;

pub mod manifests;
pub mod pods;

pub use pods::KubePods;

pub const REVISION_ANNOTATION: &str = "deployment.kubernetes.io/revision";
pub const POD_TEMPLATE_HASH_LABEL: &str = "pod-template-hash";

#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// Update the workload, creating it when it does not exist yet.
    async fn create_or_update_deploy(&self, spec: &DeploySpec) -> Result<()>;

    async fn create_or_update_cron_job(&self, spec: &CronJobSpec) -> Result<()>;

    /// Run a one-shot pod to completion in the background.
    fn pod_run(&self, spec: PodSpec, cancel: CancellationToken) -> PodRun;

    /// Make the workload reachable, writing progress for humans to `w`.
    async fn expose_deploy(&self, namespace: &str, name: &str, vhost: &str, w: &mut Output) -> Result<()>;

    async fn replica_set_list_by_label(
        &self,
        namespace: &str,
        label: &str,
        value: &str,
    ) -> Result<Vec<ReplicaSetListItem>>;

    async fn deploy_rollback_to_revision(&self, namespace: &str, name: &str, revision: &str) -> Result<()>;
}

/// Convert a kube error, counting it under `action`.
pub(crate) fn kube_error(action: &'static str) -> impl Fn(kube::Error) -> Error {
    move |err| {
        let err = Error::from(err);
        metrics::kube_error_happened(action, &err);
        err
    }
}

#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
    runner: PodRunner<KubePods>,
    default_service_type: String,
}

impl KubeGateway {
    pub fn new(client: Client, config: &Config) -> Self {
        let pods = Arc::new(KubePods::new(client.clone()));
        KubeGateway {
            runner: PodRunner::new(pods, config.run_settings()),
            default_service_type: config.default_service_type.clone(),
            client,
        }
    }

    /// Replica count to keep on update, so a deploy does not undo scaling.
    async fn current_replicas(&self, api: &Api<Deployment>, name: &str, fallback: i32) -> i32 {
        match api.get(name).await {
            Ok(deploy) => deploy
                .status
                .and_then(|status| status.replicas)
                .filter(|replicas| *replicas >= 1)
                .unwrap_or(fallback),
            Err(_) => fallback,
        }
    }

    async fn exists<K>(&self, api: &Api<K>, name: &str, action: &'static str) -> Result<bool>
    where
        K: Clone + DeserializeOwned + Debug,
    {
        match api.get(name).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(false),
            Err(err) => Err(kube_error(action)(err)),
        }
    }
}

/// Update `obj`, falling back to creating it when the API reports it missing.
async fn replace_or_create<K>(api: &Api<K>, name: &str, obj: &K, action: &'static str) -> Result<()>
where
    K: Clone + DeserializeOwned + Serialize + Debug,
{
    let pp = PostParams::default();
    match api.replace(name, &pp, obj).await {
        Ok(_) => {
            debug!("Updated {}", name);
            Ok(())
        }
        Err(kube::Error::Api(resp)) if resp.code == 404 => {
            api.create(&pp, obj).await.map_err(kube_error(action))?;
            info!("Created {}", name);
            Ok(())
        }
        Err(err) => Err(kube_error(action)(err)),
    }
}

pub fn replica_set_item(rs: &ReplicaSet) -> ReplicaSetListItem {
    ReplicaSetListItem {
        revision: annotation(rs, REVISION_ANNOTATION).unwrap_or_default().to_string(),
        description: annotation(rs, CHANGE_CAUSE_ANNOTATION).unwrap_or_default().to_string(),
        created_at: rs.metadata.creation_timestamp.as_ref().map(|t| t.0),
        replicas: rs.status.as_ref().map(|s| s.replicas).unwrap_or(0),
        current: false,
    }
}

/// Sort by revision number and flag the newest one as current.
pub fn sort_revisions(mut items: Vec<ReplicaSetListItem>) -> Vec<ReplicaSetListItem> {
    items.sort_by_key(|item| item.revision.parse::<i64>().unwrap_or(0));
    if let Some(last) = items.last_mut() {
        last.current = true;
    }
    items
}

#[async_trait]
impl ClusterGateway for KubeGateway {
    async fn create_or_update_deploy(&self, spec: &DeploySpec) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &spec.namespace);
        let replicas = self.current_replicas(&api, &spec.name, spec.min_replicas).await;
        let deploy: Deployment = serde_json::from_value(manifests::deployment(spec, replicas))?;
        replace_or_create(&api, &spec.name, &deploy, "create_or_update_deploy").await
    }

    async fn create_or_update_cron_job(&self, spec: &CronJobSpec) -> Result<()> {
        let api: Api<CronJob> = Api::namespaced(self.client.clone(), &spec.namespace);
        let cron_job: CronJob = serde_json::from_value(manifests::cron_job(spec))?;
        replace_or_create(&api, &spec.name, &cron_job, "create_or_update_cron_job").await
    }

    fn pod_run(&self, spec: PodSpec, cancel: CancellationToken) -> PodRun {
        self.runner.run(spec, cancel)
    }

    async fn expose_deploy(&self, namespace: &str, name: &str, vhost: &str, w: &mut Output) -> Result<()> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        if !self.exists(&services, name, "get_service").await? {
            w.line("Exposing service").await;
            let service: Service = serde_json::from_value(manifests::service(
                namespace,
                name,
                &self.default_service_type,
                RUN_LABEL,
            ))?;
            services
                .create(&PostParams::default(), &service)
                .await
                .map_err(kube_error("create_service"))?;
        }

        if vhost.is_empty() {
            return Ok(());
        }
        let ingresses: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        if !self.exists(&ingresses, name, "get_ingress").await? {
            w.line(format!("Creating ingress for {}", vhost)).await;
            let ingress: Ingress = serde_json::from_value(manifests::ingress(namespace, name, vhost))?;
            ingresses
                .create(&PostParams::default(), &ingress)
                .await
                .map_err(kube_error("create_ingress"))?;
        }
        Ok(())
    }

    async fn replica_set_list_by_label(
        &self,
        namespace: &str,
        label: &str,
        value: &str,
    ) -> Result<Vec<ReplicaSetListItem>> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&format!("{}={}", label, value));
        let list = api.list(&params).await.map_err(kube_error("list_replica_sets"))?;
        Ok(sort_revisions(list.items.iter().map(replica_set_item).collect()))
    }

    async fn deploy_rollback_to_revision(&self, namespace: &str, name: &str, revision: &str) -> Result<()> {
        let replica_sets: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&format!("{}={}", RUN_LABEL, name));
        let list = replica_sets
            .list(&params)
            .await
            .map_err(kube_error("list_replica_sets"))?;

        let target = list
            .items
            .into_iter()
            .find(|rs| annotation(rs, REVISION_ANNOTATION) == Some(revision))
            .ok_or_else(|| Error::RevisionNotFound(revision.to_string()))?;
        let mut template = target
            .spec
            .and_then(|spec| spec.template)
            .ok_or(Error::MissingKey(".spec.template"))?;
        if let Some(labels) = template.metadata.as_mut().and_then(|m| m.labels.as_mut()) {
            labels.remove(POD_TEMPLATE_HASH_LABEL);
        }

        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "spec": { "template": template } });
        deployments
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(kube_error("rollback_deploy"))?;
        info!("Rolled back {}/{} to revision {}", namespace, name, revision);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replica_set(revision: &str, replicas: i32) -> ReplicaSet {
        let mut annotations = std::collections::BTreeMap::new();
        annotations.insert(REVISION_ANNOTATION, revision.to_string());
        annotations.insert(CHANGE_CAUSE_ANNOTATION, format!("deploy {}", revision));

        serde_json::from_value(json!({
            "metadata": {
                "name": format!("sample-{}", revision),
                "creationTimestamp": "2024-05-01T10:00:00Z",
                "annotations": annotations,
            },
            "status": { "replicas": replicas },
        }))
        .unwrap()
    }

    #[test]
    fn test_replica_set_item() {
        let item = replica_set_item(&replica_set("3", 2));
        assert_eq!(item.revision, "3");
        assert_eq!(item.description, "deploy 3");
        assert_eq!(item.replicas, 2);
        assert_eq!(item.created_at.unwrap().to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_sort_revisions_flags_newest() {
        let items = sort_revisions(vec![
            replica_set_item(&replica_set("10", 1)),
            replica_set_item(&replica_set("2", 0)),
            replica_set_item(&replica_set("9", 0)),
        ]);
        let revisions: Vec<&str> = items.iter().map(|i| i.revision.as_str()).collect();
        assert_eq!(revisions, vec!["2", "9", "10"]);
        assert!(items[2].current);
        assert!(!items[0].current && !items[1].current);
    }
}
