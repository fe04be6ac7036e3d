//! Declarative workload specifications built from an app and deploy parameters.
//!
//! Everything in here is pure: specs are built fresh for each deploy attempt and handed
//! to the cluster gateway as they are.

use std::collections::BTreeMap;

use crate::app::{App, LimitRangeQuantity, Limits};
use crate::errors::{Error, Result};
use crate::storage::Storage;
use crate::utils::object_name;

pub mod cron;
pub mod deploy;
pub mod pod;

pub use cron::{command_args, CronJobSpec};
pub use deploy::DeploySpec;
pub use pod::{InitContainer, PodSpec};

pub const SLUG_VOLUME_NAME: &str = "slug";
pub const SLUG_MOUNT_PATH: &str = "/slug";
pub const STORAGE_KEYS_VOLUME_NAME: &str = "storage-keys";
pub const STORAGE_KEYS_MOUNT_PATH: &str = "/var/run/secrets/storage/creds";

/// Label carrying the app name on every workload, used to list revisions.
pub const RUN_LABEL: &str = "run";
pub const CHANGE_CAUSE_ANNOTATION: &str = "kubernetes.io/change-cause";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SlugImages {
    pub runner: String,
    pub store: String,
}

/// Cpu and memory caps for one-shot pods (builds and release commands).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContainerLimits {
    pub cpu: String,
    pub memory: String,
}

impl ContainerLimits {
    pub fn to_resources(&self) -> Result<Resources> {
        let mut limits = BTreeMap::new();
        for (name, quantity) in [("cpu", &self.cpu), ("memory", &self.memory)] {
            if quantity.is_empty() {
                continue;
            }
            validate_quantity(quantity)?;
            limits.insert(name.to_string(), quantity.clone());
        }
        Ok(Resources {
            limits,
            requests: BTreeMap::new(),
        })
    }
}

/// Container resource limits and requests, keyed by resource name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resources {
    pub limits: BTreeMap<String, String>,
    pub requests: BTreeMap<String, String>,
}

impl Resources {
    pub fn from_app_limits(limits: &Limits) -> Result<Self> {
        Ok(Resources {
            limits: quantity_map(&limits.default)?,
            requests: quantity_map(&limits.default_request)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.limits.is_empty() && self.requests.is_empty()
    }
}

fn quantity_map(items: &[LimitRangeQuantity]) -> Result<BTreeMap<String, String>> {
    items
        .iter()
        .map(|item| {
            validate_quantity(&item.quantity)?;
            Ok((item.resource.clone(), item.quantity.clone()))
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VolumeSource {
    Secret(String),
    EmptyDir,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Volume {
    pub name: String,
    pub source: VolumeSource,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
    pub read_only: bool,
}

impl VolumeMount {
    pub fn storage_keys() -> Self {
        VolumeMount {
            name: STORAGE_KEYS_VOLUME_NAME.to_string(),
            mount_path: STORAGE_KEYS_MOUNT_PATH.to_string(),
            read_only: true,
        }
    }

    pub fn slug(read_only: bool) -> Self {
        VolumeMount {
            name: SLUG_VOLUME_NAME.to_string(),
            mount_path: SLUG_MOUNT_PATH.to_string(),
            read_only,
        }
    }
}

/// Volumes every slug pod carries: the store credentials and a scratch dir for the slug.
pub(crate) fn slug_volumes(storage: &dyn Storage) -> Vec<Volume> {
    vec![
        Volume {
            name: STORAGE_KEYS_VOLUME_NAME.to_string(),
            source: VolumeSource::Secret(storage.access_secret_name().to_string()),
        },
        Volume {
            name: SLUG_VOLUME_NAME.to_string(),
            source: VolumeSource::EmptyDir,
        },
    ]
}

/// App variables first, then the storage ones, then the step's own; later layers win.
pub(crate) fn merge_env(
    app: &App,
    storage: &dyn Storage,
    step_env: BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = app
        .env_vars
        .iter()
        .map(|ev| (ev.key.clone(), ev.value.clone()))
        .collect();
    env.extend(storage.pod_env());
    env.extend(step_env);
    env
}

/// Name of a one-shot pod for `role` in one deploy attempt of `app_name`.
pub fn pod_name(role: &str, app_name: &str, deploy_id: &str) -> String {
    object_name(&format!("{}-", role), &format!("{}-{}", app_name, deploy_id))
}

pub fn run_labels(app_name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(RUN_LABEL.to_string(), app_name.to_string());
    labels
}

const BINARY_SUFFIXES: &[&str] = &["Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];
const DECIMAL_SUFFIXES: &[&str] = &["n", "u", "m", "", "k", "M", "G", "T", "P", "E"];

/// Check a Kubernetes resource quantity such as `500m`, `1Gi` or `1.5e3`.
pub fn validate_quantity(quantity: &str) -> Result<()> {
    let invalid = || Error::InvalidResourceLimit(quantity.to_string());

    let unsigned = quantity
        .strip_prefix('+')
        .or_else(|| quantity.strip_prefix('-'))
        .unwrap_or(quantity);
    let number_len = unsigned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(unsigned.len());
    let (number, suffix) = unsigned.split_at(number_len);

    let mut parts = number.splitn(2, '.');
    let whole = parts.next().unwrap_or("");
    let fraction = parts.next();
    if fraction.map_or(false, |f| f.contains('.')) {
        return Err(invalid());
    }
    if whole.is_empty() && fraction.map_or(true, str::is_empty) {
        return Err(invalid());
    }

    let valid_suffix = BINARY_SUFFIXES.contains(&suffix)
        || DECIMAL_SUFFIXES.contains(&suffix)
        || is_exponent(suffix);
    if valid_suffix {
        Ok(())
    } else {
        Err(invalid())
    }
}

fn is_exponent(suffix: &str) -> bool {
    let digits = match suffix.strip_prefix('e').or_else(|| suffix.strip_prefix('E')) {
        Some(rest) => rest
            .strip_prefix('+')
            .or_else(|| rest.strip_prefix('-'))
            .unwrap_or(rest),
        None => return false,
    };
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}
