use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::Result;

/// Artifact store for uploaded archives and built slugs.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Backend name handed to the builder and store images (`s3`, `minio`, ...).
    fn storage_type(&self) -> &str;

    /// Kubernetes secret holding the credentials pods use to reach the store.
    fn access_secret_name(&self) -> &str;

    /// Extra environment pods need to talk to the store.
    fn pod_env(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    async fn upload_file(&self, path: &str, file: Bytes) -> Result<()>;
}
