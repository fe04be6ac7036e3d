//! Deploy pipeline: turns an uploaded archive into a running workload, and lists or
//! rolls back the revisions it produced.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::app::{AppOperations, User};
use crate::errors::{Error, Result};
use crate::exec::OutputReader;
use crate::k8s::ClusterGateway;
use crate::spec::{ContainerLimits, SlugImages, RUN_LABEL};
use crate::storage::Storage;
use crate::utils::plural_str;

mod pipeline;

pub use crate::manifest::ArchiveParser;

/// One revision of a long-running workload.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetListItem {
    pub revision: String,
    pub description: String,
    pub created_at: Option<DateTime<Utc>>,
    pub replicas: i32,
    pub current: bool,
}

/// Pipeline settings taken from `Config`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Options {
    pub slug_builder_image: String,
    pub slug_runner_image: String,
    pub slug_store_image: String,
    pub build_limits: ContainerLimits,
    pub revision_history_limit: i32,
}

impl Options {
    pub fn images(&self) -> SlugImages {
        SlugImages {
            runner: self.slug_runner_image.clone(),
            store: self.slug_store_image.clone(),
        }
    }
}

/// Storage locations of a single deploy attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeployPaths {
    /// Where the uploaded archive is stored.
    pub tarball: String,
    /// Where the builder puts the slug.
    pub build_dest: String,
    pub slug_url: String,
}

impl DeployPaths {
    pub fn new(app_name: &str, deploy_id: &str) -> Self {
        let base = format!("deploys/{}/{}", app_name, deploy_id);
        let build_dest = format!("{}/out", base);
        DeployPaths {
            tarball: format!("{}/in/app.tar.gz", base),
            slug_url: format!("{}/slug.tgz", build_dest),
            build_dest,
        }
    }
}

/// A deploy running in the background.
///
/// `output` carries the human readable progress and closes when the deploy ends;
/// `outcome` receives exactly one value.
pub struct DeployHandle {
    pub deploy_id: String,
    pub output: OutputReader,
    pub outcome: oneshot::Receiver<Result<()>>,
}

#[derive(Clone)]
pub struct DeployOperations {
    apps: Arc<dyn AppOperations>,
    storage: Arc<dyn Storage>,
    k8s: Arc<dyn ClusterGateway>,
    parser: Arc<dyn ArchiveParser>,
    opts: Arc<Options>,
}

impl DeployOperations {
    pub fn new(
        apps: Arc<dyn AppOperations>,
        storage: Arc<dyn Storage>,
        k8s: Arc<dyn ClusterGateway>,
        parser: Arc<dyn ArchiveParser>,
        opts: Options,
    ) -> Self {
        DeployOperations {
            apps,
            storage,
            k8s,
            parser,
            opts: Arc::new(opts),
        }
    }

    /// Revisions of `app_name`, oldest first, the newest flagged as current.
    pub async fn list(&self, user: &User, app_name: &str) -> Result<Vec<ReplicaSetListItem>> {
        self.apps.get(app_name).await?;
        if !self.apps.has_permission(user, app_name).await {
            return Err(Error::PermissionDenied);
        }
        let items = self
            .k8s
            .replica_set_list_by_label(app_name, RUN_LABEL, app_name)
            .await
            .map_err(Error::internal)?;
        debug!("Found {} {} of {}", items.len(), plural_str(items.len(), "revisions"), app_name);
        Ok(items)
    }

    pub async fn rollback(&self, user: &User, app_name: &str, revision: &str) -> Result<()> {
        let app = self.apps.check_perm_and_get(user, app_name).await?;
        self.k8s
            .deploy_rollback_to_revision(app_name, app_name, revision)
            .await
            .map_err(Error::internal)?;
        self.apps.save_app(&app, &user.email).await.map_err(Error::internal)?;
        info!("{} rolled back {} to revision {}", user.email, app_name, revision);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_paths() {
        let paths = DeployPaths::new("sample", "abc");
        assert_eq!(paths.tarball, "deploys/sample/abc/in/app.tar.gz");
        assert_eq!(paths.build_dest, "deploys/sample/abc/out");
        assert_eq!(paths.slug_url, "deploys/sample/abc/out/slug.tgz");
    }

    #[test]
    fn test_replica_set_list_item_serialization() {
        let item = ReplicaSetListItem {
            revision: "2".to_string(),
            description: "fix".to_string(),
            created_at: None,
            replicas: 1,
            current: true,
        };
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["createdAt"], serde_json::Value::Null);
        assert_eq!(value["current"], true);
    }
}
