//! Application descriptor and the contract of the app-management collaborator.
//!
//! The schema of an `App` is owned by the app service; the deploy pipeline only reads it
//! and asks for it to be saved again after a rollback.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProcessType {
    Web,
    Worker,
    /// Scheduled process, run by a cron job instead of a long-running deployment.
    Cron,
}

impl ProcessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessType::Web => "web",
            ProcessType::Worker => "worker",
            ProcessType::Cron => "cron",
        }
    }

    /// Whether a workload of this type needs a network endpoint.
    pub fn is_exposed(&self) -> bool {
        matches!(self, ProcessType::Web)
    }
}

impl Default for ProcessType {
    fn default() -> Self {
        ProcessType::Web
    }
}

impl fmt::Display for ProcessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct LimitRangeQuantity {
    pub resource: String,
    pub quantity: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Limits {
    #[serde(default)]
    pub default: Vec<LimitRangeQuantity>,
    #[serde(default, rename = "defaultRequest")]
    pub default_request: Vec<LimitRangeQuantity>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AutoScale {
    #[serde(rename = "cpuTargetUtilization")]
    pub cpu_target_utilization: i32,
    pub min: i32,
    pub max: i32,
}

impl Default for AutoScale {
    fn default() -> Self {
        AutoScale {
            cpu_target_utilization: 70,
            min: 1,
            max: 1,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct App {
    pub name: String,
    #[serde(default)]
    pub team: String,
    #[serde(default, rename = "processType")]
    pub process_type: ProcessType,
    #[serde(default, rename = "virtualHost")]
    pub virtual_host: String,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default, rename = "envVars")]
    pub env_vars: Vec<EnvVar>,
    #[serde(default, rename = "autoScale")]
    pub auto_scale: AutoScale,
}

/// The authenticated caller of an operation.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct User {
    pub email: String,
    pub name: String,
}

/// App metadata and permissions, provided by the app service.
#[async_trait]
pub trait AppOperations: Send + Sync {
    /// Fetch an app; `Error::NotFound` when it does not exist.
    async fn get(&self, name: &str) -> Result<App>;

    async fn team_name(&self, name: &str) -> Result<String>;

    async fn has_permission(&self, user: &User, name: &str) -> bool;

    /// Permission check and fetch in one call.
    async fn check_perm_and_get(&self, user: &User, name: &str) -> Result<App>;

    /// Persist the app again, recording `last_user` as the actor.
    async fn save_app(&self, app: &App, last_user: &str) -> Result<()>;
}
