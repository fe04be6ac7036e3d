use std::collections::BTreeMap;

use crate::app::App;
use crate::errors::Result;
use crate::spec::{
    merge_env, slug_volumes, ContainerLimits, Resources, SlugImages, Volume, VolumeMount,
};
use crate::storage::Storage;

pub const RESTART_POLICY_NEVER: &str = "Never";

/// Container that runs to completion before the main one starts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InitContainer {
    pub name: String,
    pub image: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub volume_mounts: Vec<VolumeMount>,
}

/// A single-container pod, either one-shot (build, release) or the template of a workload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PodSpec {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub volumes: Vec<Volume>,
    pub volume_mounts: Vec<VolumeMount>,
    pub init_containers: Vec<InitContainer>,
    pub resources: Resources,
    pub ports: Vec<i32>,
    pub restart_policy: String,
}

impl PodSpec {
    /// Base pod for `app`: app and storage env layered under `env`, slug volumes, no mounts.
    pub fn new(
        name: &str,
        image: &str,
        app: &App,
        env: BTreeMap<String, String>,
        storage: &dyn Storage,
    ) -> Self {
        PodSpec {
            name: name.to_string(),
            namespace: app.name.clone(),
            image: image.to_string(),
            env: merge_env(app, storage, env),
            volumes: slug_volumes(storage),
            restart_policy: RESTART_POLICY_NEVER.to_string(),
            ..PodSpec::default()
        }
    }

    /// Pod that turns the uploaded archive at `tarball_path` into a slug under `build_dest`.
    pub fn builder(
        name: &str,
        tarball_path: &str,
        build_dest: &str,
        image: &str,
        app: &App,
        storage: &dyn Storage,
        limits: &ContainerLimits,
    ) -> Result<Self> {
        let mut env = BTreeMap::new();
        env.insert("TAR_PATH".to_string(), tarball_path.to_string());
        env.insert("PUT_PATH".to_string(), build_dest.to_string());
        env.insert("BUILDER_STORAGE".to_string(), storage.storage_type().to_string());

        let mut pod = PodSpec::new(name, image, app, env, storage);
        pod.volume_mounts = vec![VolumeMount::storage_keys()];
        pod.resources = limits.to_resources()?;
        Ok(pod)
    }

    /// Pod that runs `args` on top of the slug at `slug_url`.
    ///
    /// The slug is fetched by an init container into the shared `slug` volume, so the
    /// runner itself never needs the store credentials.
    pub fn runner(
        name: &str,
        slug_url: &str,
        images: &SlugImages,
        app: &App,
        storage: &dyn Storage,
        limits: &ContainerLimits,
        args: Vec<String>,
    ) -> Result<Self> {
        let mut pod = Self::slug_runner(name, slug_url, images, app, storage, args);
        pod.resources = limits.to_resources()?;
        Ok(pod)
    }

    pub(crate) fn slug_runner(
        name: &str,
        slug_url: &str,
        images: &SlugImages,
        app: &App,
        storage: &dyn Storage,
        args: Vec<String>,
    ) -> Self {
        let mut env = BTreeMap::new();
        env.insert("SLUG_URL".to_string(), slug_url.to_string());
        env.insert("SLUG_DIR".to_string(), super::SLUG_MOUNT_PATH.to_string());

        let mut pod = PodSpec::new(name, &images.runner, app, env, storage);
        pod.args = args;
        pod.volume_mounts = vec![VolumeMount::slug(true)];
        pod.init_containers = vec![slug_store(slug_url, &images.store, storage)];
        pod
    }
}

fn slug_store(slug_url: &str, image: &str, storage: &dyn Storage) -> InitContainer {
    let mut env = storage.pod_env();
    env.insert("SLUG_URL".to_string(), slug_url.to_string());
    env.insert("SLUG_DIR".to_string(), super::SLUG_MOUNT_PATH.to_string());
    env.insert("BUILDER_STORAGE".to_string(), storage.storage_type().to_string());

    InitContainer {
        name: "slugstore".to_string(),
        image: image.to_string(),
        args: Vec::new(),
        env,
        volume_mounts: vec![VolumeMount::storage_keys(), VolumeMount::slug(false)],
    }
}
