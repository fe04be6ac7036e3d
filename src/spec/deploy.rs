use std::collections::BTreeMap;

use crate::app::{App, ProcessType};
use crate::errors::Result;
use crate::manifest::{AppManifest, HealthCheck, RollingUpdate};
use crate::spec::{run_labels, PodSpec, Resources, SlugImages, CHANGE_CAUSE_ANNOTATION};
use crate::storage::Storage;

/// Port web processes are told to listen on.
pub const WEB_PORT: i32 = 5000;

/// A long-running workload running the slug's `start <process type>` command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeploySpec {
    pub name: String,
    pub namespace: String,
    pub process_type: ProcessType,
    pub description: String,
    pub slug_url: String,
    pub revision_history_limit: i32,
    pub min_replicas: i32,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub pod: PodSpec,
    pub health_check: Option<HealthCheck>,
    pub rolling_update: Option<RollingUpdate>,
}

impl DeploySpec {
    pub fn new(
        images: &SlugImages,
        description: &str,
        slug_url: &str,
        revision_history_limit: i32,
        app: &App,
        manifest: Option<&AppManifest>,
        storage: &dyn Storage,
    ) -> Result<Self> {
        let args = vec!["start".to_string(), app.process_type.to_string()];
        let mut pod = PodSpec::slug_runner(&app.name, slug_url, images, app, storage, args);
        pod.resources = Resources::from_app_limits(&app.limits)?;
        pod.restart_policy = "Always".to_string();
        if app.process_type == ProcessType::Web {
            pod.env.insert("PORT".to_string(), WEB_PORT.to_string());
            pod.ports = vec![WEB_PORT];
        }

        let mut annotations = BTreeMap::new();
        annotations.insert(CHANGE_CAUSE_ANNOTATION.to_string(), description.to_string());

        Ok(DeploySpec {
            name: app.name.clone(),
            namespace: app.name.clone(),
            process_type: app.process_type,
            description: description.to_string(),
            slug_url: slug_url.to_string(),
            revision_history_limit,
            min_replicas: app.auto_scale.min.max(1),
            labels: run_labels(&app.name),
            annotations,
            pod,
            health_check: manifest.and_then(|m| m.health_check.clone()),
            rolling_update: manifest.and_then(|m| m.rolling_update.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{LimitRangeQuantity, Limits};
    use crate::errors::Error;
    use crate::manifest::Probe;
    use crate::spec::{RUN_LABEL, SLUG_VOLUME_NAME};
    use async_trait::async_trait;
    use bytes::Bytes;

    struct FakeStorage;

    #[async_trait]
    impl Storage for FakeStorage {
        fn storage_type(&self) -> &str {
            "fake"
        }
        fn access_secret_name(&self) -> &str {
            "storage-secret"
        }
        async fn upload_file(&self, _path: &str, _file: Bytes) -> Result<()> {
            Ok(())
        }
    }

    fn images() -> SlugImages {
        SlugImages {
            runner: "runner".to_string(),
            store: "store".to_string(),
        }
    }

    fn web_app() -> App {
        App {
            name: "sample".to_string(),
            process_type: ProcessType::Web,
            limits: Limits {
                default: vec![LimitRangeQuantity {
                    resource: "memory".to_string(),
                    quantity: "512Mi".to_string(),
                }],
                default_request: vec![LimitRangeQuantity {
                    resource: "cpu".to_string(),
                    quantity: "100m".to_string(),
                }],
            },
            ..App::default()
        }
    }

    #[test]
    fn test_new_deploy_spec() {
        let manifest = AppManifest {
            health_check: Some(HealthCheck {
                liveness: None,
                readiness: Some(Probe {
                    path: "/healthz".to_string(),
                    initial_delay_seconds: Some(3),
                    period_seconds: None,
                    timeout_seconds: None,
                    failure_threshold: None,
                }),
            }),
            ..AppManifest::default()
        };
        let spec = DeploySpec::new(
            &images(),
            "first deploy",
            "deploys/sample/1/out/slug.tgz",
            5,
            &web_app(),
            Some(&manifest),
            &FakeStorage,
        )
        .unwrap();

        assert_eq!(spec.name, "sample");
        assert_eq!(spec.namespace, "sample");
        assert_eq!(spec.revision_history_limit, 5);
        assert_eq!(spec.labels[RUN_LABEL], "sample");
        assert_eq!(spec.annotations[CHANGE_CAUSE_ANNOTATION], "first deploy");
        assert_eq!(spec.pod.image, "runner");
        assert_eq!(spec.pod.args, vec!["start", "web"]);
        assert_eq!(spec.pod.env["SLUG_URL"], "deploys/sample/1/out/slug.tgz");
        assert_eq!(spec.pod.env["PORT"], "5000");
        assert_eq!(spec.pod.ports, vec![WEB_PORT]);
        assert_eq!(spec.pod.resources.limits["memory"], "512Mi");
        assert_eq!(spec.pod.resources.requests["cpu"], "100m");
        assert_eq!(spec.pod.volume_mounts[0].name, SLUG_VOLUME_NAME);
        assert_eq!(spec.pod.init_containers[0].image, "store");
        assert!(spec.health_check.unwrap().readiness.is_some());
        assert!(spec.rolling_update.is_none());
    }

    #[test]
    fn test_worker_is_not_given_a_port() {
        let app = App {
            process_type: ProcessType::Worker,
            ..web_app()
        };
        let spec = DeploySpec::new(&images(), "", "slug", 5, &app, None, &FakeStorage).unwrap();
        assert_eq!(spec.pod.args, vec!["start", "worker"]);
        assert!(spec.pod.ports.is_empty());
        assert!(!spec.pod.env.contains_key("PORT"));
    }

    #[test]
    fn test_malformed_app_limit() {
        let mut app = web_app();
        app.limits.default[0].quantity = "half a gig".to_string();
        let result = DeploySpec::new(&images(), "", "slug", 5, &app, None, &FakeStorage);
        assert!(matches!(result, Err(Error::InvalidResourceLimit(_))));
    }
}
