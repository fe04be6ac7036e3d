use std::collections::BTreeMap;

use crate::app::App;
use crate::errors::Result;
use crate::spec::{run_labels, PodSpec, Resources, SlugImages, CHANGE_CAUSE_ANNOTATION};
use crate::storage::Storage;

pub const CONCURRENCY_POLICY_FORBID: &str = "Forbid";

/// A scheduled job running `args` on top of the slug.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CronJobSpec {
    pub name: String,
    pub namespace: String,
    pub schedule: String,
    pub description: String,
    pub concurrency_policy: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub pod: PodSpec,
}

impl CronJobSpec {
    pub fn new(
        description: &str,
        slug_url: &str,
        schedule: &str,
        images: &SlugImages,
        app: &App,
        storage: &dyn Storage,
        args: Vec<String>,
    ) -> Result<Self> {
        let mut pod = PodSpec::slug_runner(&app.name, slug_url, images, app, storage, args);
        pod.resources = Resources::from_app_limits(&app.limits)?;

        let mut annotations = BTreeMap::new();
        annotations.insert(CHANGE_CAUSE_ANNOTATION.to_string(), description.to_string());

        Ok(CronJobSpec {
            name: app.name.clone(),
            namespace: app.name.clone(),
            schedule: schedule.to_string(),
            description: description.to_string(),
            concurrency_policy: CONCURRENCY_POLICY_FORBID.to_string(),
            labels: run_labels(&app.name),
            annotations,
            pod,
        })
    }
}

/// Split a Procfile command line into container args.
pub fn command_args(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}
