//! Config files shipped inside an uploaded archive.
//!
//! Reading them out of the archive is the job of an `ArchiveParser` provided by the caller;
//! this module only defines what the parsed result looks like.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::app::ProcessType;

pub const PROCFILE_RELEASE_CMD: &str = "release";

/// Named process commands, e.g. `web: python app.py`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct Procfile(pub BTreeMap<String, String>);

impl Procfile {
    pub fn command(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .map(|cmd| cmd.trim())
            .filter(|cmd| !cmd.is_empty())
    }

    /// The release command, when one is declared and non-empty.
    pub fn release_command(&self) -> Option<&str> {
        self.command(PROCFILE_RELEASE_CMD)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Procfile {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Procfile(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Probe {
    pub path: String,
    #[serde(default)]
    pub initial_delay_seconds: Option<i32>,
    #[serde(default)]
    pub period_seconds: Option<i32>,
    #[serde(default)]
    pub timeout_seconds: Option<i32>,
    #[serde(default)]
    pub failure_threshold: Option<i32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct HealthCheck {
    #[serde(default)]
    pub liveness: Option<Probe>,
    #[serde(default)]
    pub readiness: Option<Probe>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RollingUpdate {
    pub max_surge: String,
    pub max_unavailable: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CronSchedule {
    pub schedule: String,
}

/// The app manifest (`teresa.yaml` style file).
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppManifest {
    #[serde(default)]
    pub health_check: Option<HealthCheck>,
    #[serde(default)]
    pub rolling_update: Option<RollingUpdate>,
    #[serde(default)]
    pub cron: Option<CronSchedule>,
}

/// Everything extracted from the archive for one deploy attempt.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeployConfigFiles {
    pub procfile: Option<Procfile>,
    pub manifest: Option<AppManifest>,
}

impl DeployConfigFiles {
    pub fn release_command(&self) -> Option<&str> {
        self.procfile.as_ref().and_then(Procfile::release_command)
    }

    pub fn schedule(&self) -> Option<&str> {
        self.manifest
            .as_ref()
            .and_then(|m| m.cron.as_ref())
            .map(|c| c.schedule.trim())
            .filter(|s| !s.is_empty())
    }

    pub fn command(&self, process_type: ProcessType) -> Option<&str> {
        self.procfile
            .as_ref()
            .and_then(|p| p.command(process_type.as_str()))
    }
}

/// Extracts the config files from a raw uploaded archive.
pub trait ArchiveParser: Send + Sync {
    fn config_files(
        &self,
        archive: &[u8],
        process_type: ProcessType,
    ) -> Result<DeployConfigFiles, Box<dyn std::error::Error + Send + Sync>>;
}
