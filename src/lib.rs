use std::time::Duration;

use serde::Deserialize;

pub mod app;
pub mod deploy;
pub mod errors;
pub mod exec;
pub mod k8s;
pub mod manifest;
pub mod metrics;
pub mod spec;
pub mod storage;
pub mod utils;
pub mod views;

pub use deploy::{DeployHandle, DeployOperations};
pub use errors::{Error, Result};
pub use k8s::{ClusterGateway, KubeGateway};

use crate::deploy::Options;
use crate::exec::RunSettings;
use crate::spec::{validate_quantity, ContainerLimits};

fn default_slug_builder_image() -> String {
    "slug-controller/slugbuilder:latest".to_owned()
}
fn default_slug_runner_image() -> String {
    "slug-controller/slugrunner:latest".to_owned()
}
fn default_slug_store_image() -> String {
    "slug-controller/slugstore:latest".to_owned()
}
fn default_build_limit_cpu() -> String {
    "800m".to_owned()
}
fn default_build_limit_memory() -> String {
    "1Gi".to_owned()
}
fn default_revision_history_limit() -> i32 {
    5
}
fn default_service_type() -> String {
    "LoadBalancer".to_owned()
}
fn default_pod_poll_interval_secs() -> u64 {
    1
}
fn default_pod_poll_timeout_secs() -> u64 {
    300
}
fn default_log_drain_timeout_secs() -> u64 {
    30
}
fn default_server_host() -> String {
    "0.0.0.0".to_owned()
}
fn default_server_port() -> u16 {
    8888
}

/// Raw settings as read from the process environment.
#[derive(Deserialize, Debug, Clone)]
pub struct EnvironmentConfig {
    #[serde(default = "default_slug_builder_image")]
    pub slug_builder_image: String,
    #[serde(default = "default_slug_runner_image")]
    pub slug_runner_image: String,
    #[serde(default = "default_slug_store_image")]
    pub slug_store_image: String,
    #[serde(default = "default_build_limit_cpu")]
    pub build_limit_cpu: String,
    #[serde(default = "default_build_limit_memory")]
    pub build_limit_memory: String,
    #[serde(default = "default_revision_history_limit")]
    pub revision_history_limit: i32,
    #[serde(default = "default_service_type")]
    pub default_service_type: String,
    #[serde(default = "default_pod_poll_interval_secs")]
    pub pod_poll_interval_secs: u64,
    #[serde(default = "default_pod_poll_timeout_secs")]
    pub pod_poll_timeout_secs: u64,
    #[serde(default = "default_log_drain_timeout_secs")]
    pub log_drain_timeout_secs: u64,
    #[serde(default = "default_server_host")]
    pub server_host: String,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        EnvironmentConfig {
            slug_builder_image: default_slug_builder_image(),
            slug_runner_image: default_slug_runner_image(),
            slug_store_image: default_slug_store_image(),
            build_limit_cpu: default_build_limit_cpu(),
            build_limit_memory: default_build_limit_memory(),
            revision_history_limit: default_revision_history_limit(),
            default_service_type: default_service_type(),
            pod_poll_interval_secs: default_pod_poll_interval_secs(),
            pod_poll_timeout_secs: default_pod_poll_timeout_secs(),
            log_drain_timeout_secs: default_log_drain_timeout_secs(),
            server_host: default_server_host(),
            server_port: default_server_port(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub slug_builder_image: String,
    pub slug_runner_image: String,
    pub slug_store_image: String,
    pub build_limits: ContainerLimits,
    pub revision_history_limit: i32,
    pub default_service_type: String,
    pub pod_poll_interval: Duration,
    pub pod_poll_timeout: Duration,
    pub log_drain_timeout: Duration,
    pub server_host: String,
    pub server_port: u16,
}

impl Config {
    pub fn from_env_config(env_config: EnvironmentConfig) -> Result<Self> {
        for quantity in [&env_config.build_limit_cpu, &env_config.build_limit_memory] {
            if !quantity.is_empty() {
                validate_quantity(quantity)?;
            }
        }
        if env_config.pod_poll_interval_secs == 0 {
            return Err(Error::MissingKey("POD_POLL_INTERVAL_SECS"));
        }

        Ok(Config {
            slug_builder_image: env_config.slug_builder_image,
            slug_runner_image: env_config.slug_runner_image,
            slug_store_image: env_config.slug_store_image,
            build_limits: ContainerLimits {
                cpu: env_config.build_limit_cpu,
                memory: env_config.build_limit_memory,
            },
            revision_history_limit: env_config.revision_history_limit,
            default_service_type: env_config.default_service_type,
            pod_poll_interval: Duration::from_secs(env_config.pod_poll_interval_secs),
            pod_poll_timeout: Duration::from_secs(env_config.pod_poll_timeout_secs),
            log_drain_timeout: Duration::from_secs(env_config.log_drain_timeout_secs),
            server_host: env_config.server_host,
            server_port: env_config.server_port,
        })
    }

    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            poll_interval: self.pod_poll_interval,
            timeout: self.pod_poll_timeout,
            log_drain_timeout: self.log_drain_timeout,
        }
    }

    pub fn deploy_options(&self) -> Options {
        Options {
            slug_builder_image: self.slug_builder_image.clone(),
            slug_runner_image: self.slug_runner_image.clone(),
            slug_store_image: self.slug_store_image.clone(),
            build_limits: self.build_limits.clone(),
            revision_history_limit: self.revision_history_limit,
        }
    }
}
