//! Kubernetes manifests for the workload specs.

use serde_json::{json, Map, Value};

use crate::manifest::{HealthCheck, Probe, RollingUpdate};
use crate::spec::deploy::WEB_PORT;
use crate::spec::{
    CronJobSpec, DeploySpec, InitContainer, PodSpec, Resources, Volume, VolumeMount, VolumeSource,
};
use crate::utils::env_vars;

pub const SERVICE_PORT: i32 = 80;
pub const SUCCESSFUL_JOBS_HISTORY_LIMIT: i32 = 3;
pub const FAILED_JOBS_HISTORY_LIMIT: i32 = 1;

/// A one-shot pod.
pub fn pod(spec: &PodSpec) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": &spec.name,
            "namespace": &spec.namespace,
        },
        "spec": pod_spec(spec, None),
    })
}

pub fn deployment(spec: &DeploySpec, replicas: i32) -> Value {
    let mut deploy_spec = json!({
        "replicas": replicas,
        "revisionHistoryLimit": spec.revision_history_limit,
        "selector": {
            "matchLabels": &spec.labels,
        },
        "template": {
            "metadata": {
                "labels": &spec.labels,
            },
            "spec": pod_spec(&spec.pod, spec.health_check.as_ref()),
        },
    });
    if let Some(rolling_update) = &spec.rolling_update {
        deploy_spec["strategy"] = strategy(rolling_update);
    }

    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": &spec.name,
            "namespace": &spec.namespace,
            "labels": &spec.labels,
            "annotations": &spec.annotations,
        },
        "spec": deploy_spec,
    })
}

pub fn cron_job(spec: &CronJobSpec) -> Value {
    json!({
        "apiVersion": "batch/v1",
        "kind": "CronJob",
        "metadata": {
            "name": &spec.name,
            "namespace": &spec.namespace,
            "labels": &spec.labels,
            "annotations": &spec.annotations,
        },
        "spec": {
            "schedule": &spec.schedule,
            "concurrencyPolicy": &spec.concurrency_policy,
            "successfulJobsHistoryLimit": SUCCESSFUL_JOBS_HISTORY_LIMIT,
            "failedJobsHistoryLimit": FAILED_JOBS_HISTORY_LIMIT,
            "jobTemplate": {
                "spec": {
                    "template": {
                        "metadata": {
                            "labels": &spec.labels,
                        },
                        "spec": pod_spec(&spec.pod, None),
                    },
                },
            },
        },
    })
}

pub fn service(namespace: &str, name: &str, service_type: &str, selector_label: &str) -> Value {
    let mut selector = Map::new();
    selector.insert(selector_label.to_string(), json!(name));

    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": &selector,
        },
        "spec": {
            "type": service_type,
            "selector": &selector,
            "ports": [{
                "name": "http",
                "port": SERVICE_PORT,
                "targetPort": WEB_PORT,
                "protocol": "TCP",
            }],
        },
    })
}

pub fn ingress(namespace: &str, name: &str, vhost: &str) -> Value {
    json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "Ingress",
        "metadata": {
            "name": name,
            "namespace": namespace,
        },
        "spec": {
            "rules": [{
                "host": vhost,
                "http": {
                    "paths": [{
                        "path": "/",
                        "pathType": "Prefix",
                        "backend": {
                            "service": {
                                "name": name,
                                "port": { "number": SERVICE_PORT },
                            },
                        },
                    }],
                },
            }],
        },
    })
}

fn pod_spec(spec: &PodSpec, health_check: Option<&HealthCheck>) -> Value {
    let mut container = json!({
        "name": &spec.name,
        "image": &spec.image,
        "imagePullPolicy": "IfNotPresent",
        "args": &spec.args,
        "env": env_vars(&spec.env),
        "volumeMounts": volume_mounts(&spec.volume_mounts),
    });
    if !spec.resources.is_empty() {
        container["resources"] = resources(&spec.resources);
    }
    if !spec.ports.is_empty() {
        container["ports"] = spec
            .ports
            .iter()
            .map(|port| json!({ "containerPort": port }))
            .collect();
    }
    if let Some(health_check) = health_check {
        if let Some(liveness) = &health_check.liveness {
            container["livenessProbe"] = probe(liveness);
        }
        if let Some(readiness) = &health_check.readiness {
            container["readinessProbe"] = probe(readiness);
        }
    }

    json!({
        "restartPolicy": &spec.restart_policy,
        "volumes": spec.volumes.iter().map(volume).collect::<Vec<_>>(),
        "initContainers": spec.init_containers.iter().map(init_container).collect::<Vec<_>>(),
        "containers": [container],
    })
}

fn init_container(init: &InitContainer) -> Value {
    json!({
        "name": &init.name,
        "image": &init.image,
        "imagePullPolicy": "IfNotPresent",
        "args": &init.args,
        "env": env_vars(&init.env),
        "volumeMounts": volume_mounts(&init.volume_mounts),
    })
}

fn volume(volume: &Volume) -> Value {
    match &volume.source {
        VolumeSource::Secret(secret_name) => json!({
            "name": &volume.name,
            "secret": { "secretName": secret_name },
        }),
        VolumeSource::EmptyDir => json!({
            "name": &volume.name,
            "emptyDir": {},
        }),
    }
}

fn volume_mounts(mounts: &[VolumeMount]) -> Vec<Value> {
    mounts
        .iter()
        .map(|mount| {
            json!({
                "name": &mount.name,
                "mountPath": &mount.mount_path,
                "readOnly": mount.read_only,
            })
        })
        .collect()
}

fn resources(resources: &Resources) -> Value {
    let mut value = Map::new();
    if !resources.limits.is_empty() {
        value.insert("limits".to_string(), json!(&resources.limits));
    }
    if !resources.requests.is_empty() {
        value.insert("requests".to_string(), json!(&resources.requests));
    }
    Value::Object(value)
}

fn probe(probe: &Probe) -> Value {
    let mut value = json!({
        "httpGet": {
            "path": &probe.path,
            "port": WEB_PORT,
        },
    });
    let optional = [
        ("initialDelaySeconds", probe.initial_delay_seconds),
        ("periodSeconds", probe.period_seconds),
        ("timeoutSeconds", probe.timeout_seconds),
        ("failureThreshold", probe.failure_threshold),
    ];
    for (key, setting) in optional {
        if let Some(setting) = setting {
            value[key] = json!(setting);
        }
    }
    value
}

/// Numbers are absolute counts for the API, anything else (`25%`) stays a string.
fn int_or_string(value: &str) -> Value {
    match value.parse::<i32>() {
        Ok(n) => json!(n),
        Err(_) => json!(value),
    }
}

fn strategy(rolling_update: &RollingUpdate) -> Value {
    json!({
        "type": "RollingUpdate",
        "rollingUpdate": {
            "maxSurge": int_or_string(&rolling_update.max_surge),
            "maxUnavailable": int_or_string(&rolling_update.max_unavailable),
        },
    })
}
