use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Key '{0}' is empty")]
    MissingKey(&'static str),

    #[error("Kube API Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serde Error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to load environment config: {0}")]
    EnvConfig(#[from] envy::Error),

    #[error("Metrics Error: {0}")]
    Metrics(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Invalid app config files: {0}")]
    InvalidManifest(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Invalid resource limit '{0}'")]
    InvalidResourceLimit(String),

    #[error("Storage Error: {0}")]
    Storage(String),

    #[error("Revision {0} not found")]
    RevisionNotFound(String),

    #[error("Build failed")]
    BuildFailed,

    #[error("Release command failed")]
    ReleaseFailed,

    #[error("Creating deploy failed: {0}")]
    DeployFailed(#[source] Box<Error>),

    #[error("Creating cron job failed: {0}")]
    JobCreateFailed(#[source] Box<Error>),

    #[error("Exposing app failed: {0}")]
    ExposeFailed(#[source] Box<Error>),

    #[error("Deploy cancelled")]
    Cancelled,

    #[error("Internal server error: {0}")]
    Internal(#[source] Box<Error>),
}

impl Error {
    pub fn internal(err: Error) -> Self {
        Error::Internal(Box::new(err))
    }

    pub fn invalid_manifest<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::InvalidManifest(err.into())
    }

    /// Short label used for the outcome metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MissingKey(_) => "missing_key",
            Error::KubeError(_) => "kube",
            Error::SerdeError(_) => "serde",
            Error::Io(_) => "io",
            Error::EnvConfig(_) => "env_config",
            Error::Metrics(_) => "metrics",
            Error::NotFound(_) => "not_found",
            Error::PermissionDenied => "permission_denied",
            Error::InvalidManifest(_) => "invalid_manifest",
            Error::InvalidResourceLimit(_) => "invalid_resource_limit",
            Error::Storage(_) => "storage",
            Error::RevisionNotFound(_) => "revision_not_found",
            Error::BuildFailed => "build_failed",
            Error::ReleaseFailed => "release_failed",
            Error::DeployFailed(_) => "deploy_failed",
            Error::JobCreateFailed(_) => "job_create_failed",
            Error::ExposeFailed(_) => "expose_failed",
            Error::Cancelled => "cancelled",
            Error::Internal(_) => "internal",
        }
    }
}
