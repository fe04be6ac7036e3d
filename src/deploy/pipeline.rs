use bytes::Bytes;
use log::{error, info};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::app::{App, ProcessType, User};
use crate::deploy::{DeployHandle, DeployOperations, DeployPaths};
use crate::errors::{Error, Result};
use crate::exec::{pipe, Output, RunError};
use crate::manifest::DeployConfigFiles;
use crate::metrics;
use crate::spec::{command_args, pod_name, CronJobSpec, DeploySpec, PodSpec, Resources};
use crate::utils::new_deploy_id;

/// Everything one deploy attempt works on once it has been validated.
struct Attempt {
    id: String,
    app: App,
    config: DeployConfigFiles,
    paths: DeployPaths,
    archive: Bytes,
    description: String,
    cancel: CancellationToken,
}

/// Why a one-shot pod did not exit cleanly.
#[derive(Debug, Error)]
enum PodFailure {
    #[error("exited with code {0}")]
    Exit(i32),

    #[error(transparent)]
    Run(#[from] RunError),
}

async fn cancelled(w: &mut Output) -> Error {
    w.line("The Deploy was cancelled").await;
    Error::Cancelled
}

impl DeployOperations {
    /// Validate the request and start deploying `archive` as a new version of `app_name`.
    ///
    /// Returns once the app, its limits, the caller and the archive config have been checked; the
    /// upload, build and rollout happen in the background and report through the handle.
    pub async fn deploy(
        &self,
        cancel: CancellationToken,
        user: &User,
        app_name: &str,
        archive: Bytes,
        description: &str,
    ) -> Result<DeployHandle> {
        let mut app = self.apps.get(app_name).await?;
        app.team = self.apps.team_name(app_name).await?;
        if !self.apps.has_permission(user, app_name).await {
            return Err(Error::PermissionDenied);
        }

        let config = self
            .parser
            .config_files(&archive, app.process_type)
            .map_err(Error::InvalidManifest)?;
        if app.process_type == ProcessType::Cron {
            if config.schedule().is_none() {
                return Err(Error::invalid_manifest("cron app without a schedule"));
            }
            if config.command(ProcessType::Cron).is_none() {
                return Err(Error::invalid_manifest("cron app without a cron command in the Procfile"));
            }
        }
        Resources::from_app_limits(&app.limits)?;

        let id = new_deploy_id();
        info!("{} is deploying {} as {}", user.email, app_name, id);
        let attempt = Attempt {
            paths: DeployPaths::new(app_name, &id),
            id: id.clone(),
            app,
            config,
            archive,
            description: description.to_string(),
            cancel,
        };

        let (output, mut w) = pipe();
        let (tx, outcome) = oneshot::channel();
        let ops = self.clone();
        tokio::spawn(async move {
            let result = ops.run_attempt(&attempt, &mut w).await;
            if let Err(err) = &result {
                error!("Deploy {} of {} failed: {}", attempt.id, attempt.app.name, err);
            }
            metrics::deploy_finished(attempt.app.process_type.as_str(), &result);
            let _ = tx.send(result);
        });

        Ok(DeployHandle {
            deploy_id: id,
            output,
            outcome,
        })
    }

    async fn run_attempt(&self, a: &Attempt, w: &mut Output) -> Result<()> {
        self.build_app(a, w).await?;
        if a.cancel.is_cancelled() {
            return Err(cancelled(w).await);
        }
        match a.app.process_type {
            ProcessType::Cron => self.create_or_update_cron_job(a, w).await,
            ProcessType::Web | ProcessType::Worker => self.create_or_update_deploy(a, w).await,
        }
    }

    async fn build_app(&self, a: &Attempt, w: &mut Output) -> Result<()> {
        if a.cancel.is_cancelled() {
            return Err(cancelled(w).await);
        }
        if let Err(err) = self.storage.upload_file(&a.paths.tarball, a.archive.clone()).await {
            error!("Uploading the archive of deploy {} failed: {}", a.id, err);
            w.line("The Deploy failed to upload the tarBall to slug storage").await;
            return Err(Error::BuildFailed);
        }

        let pod = PodSpec::builder(
            &pod_name("build", &a.app.name, &a.id),
            &a.paths.tarball,
            &a.paths.build_dest,
            &self.opts.slug_builder_image,
            &a.app,
            &*self.storage,
            &self.opts.build_limits,
        )?;
        match self.run_pod(pod, a, w).await {
            Ok(()) => Ok(()),
            Err(PodFailure::Run(RunError::Cancelled)) => Err(cancelled(w).await),
            Err(err) => {
                w.line(format!("The Build failed: {}", err)).await;
                Err(Error::BuildFailed)
            }
        }
    }

    async fn run_release_cmd(&self, a: &Attempt, w: &mut Output) -> Result<()> {
        w.line("Running release command").await;
        let args = vec!["start".to_string(), "release".to_string()];
        let pod = PodSpec::runner(
            &pod_name("release", &a.app.name, &a.id),
            &a.paths.slug_url,
            &self.opts.images(),
            &a.app,
            &*self.storage,
            &self.opts.build_limits,
            args,
        )?;
        match self.run_pod(pod, a, w).await {
            Ok(()) => Ok(()),
            Err(PodFailure::Run(RunError::Cancelled)) => Err(cancelled(w).await),
            Err(err) => {
                w.line(format!("The Release command failed: {}", err)).await;
                Err(Error::ReleaseFailed)
            }
        }
    }

    async fn create_or_update_deploy(&self, a: &Attempt, w: &mut Output) -> Result<()> {
        if a.config.release_command().is_some() {
            self.run_release_cmd(a, w).await?;
            if a.cancel.is_cancelled() {
                return Err(cancelled(w).await);
            }
        }

        let spec = DeploySpec::new(
            &self.opts.images(),
            &a.description,
            &a.paths.slug_url,
            self.opts.revision_history_limit,
            &a.app,
            a.config.manifest.as_ref(),
            &*self.storage,
        )?;
        if let Err(err) = self.k8s.create_or_update_deploy(&spec).await {
            w.line("The Deploy failed to create the app workload").await;
            return Err(Error::DeployFailed(Box::new(err)));
        }

        if a.app.process_type.is_exposed() {
            if let Err(err) = self
                .k8s
                .expose_deploy(&a.app.name, &a.app.name, &a.app.virtual_host, w)
                .await
            {
                w.line(format!("The app {} was deployed but could not be exposed", a.app.name))
                    .await;
                return Err(Error::ExposeFailed(Box::new(err)));
            }
        }
        w.line(format!("The app {} has been successfully deployed", a.app.name))
            .await;
        Ok(())
    }

    async fn create_or_update_cron_job(&self, a: &Attempt, w: &mut Output) -> Result<()> {
        let schedule = a
            .config
            .schedule()
            .ok_or_else(|| Error::invalid_manifest("cron app without a schedule"))?;
        let command = a
            .config
            .command(ProcessType::Cron)
            .ok_or_else(|| Error::invalid_manifest("cron app without a cron command in the Procfile"))?;

        let spec = CronJobSpec::new(
            &a.description,
            &a.paths.slug_url,
            schedule,
            &self.opts.images(),
            &a.app,
            &*self.storage,
            command_args(command),
        )?;
        if let Err(err) = self.k8s.create_or_update_cron_job(&spec).await {
            w.line("The Deploy failed to create the CronJob").await;
            return Err(Error::JobCreateFailed(Box::new(err)));
        }
        w.line(format!("The CronJob {} has been successfully deployed", a.app.name))
            .await;
        Ok(())
    }

    /// Run `pod` to completion, streaming its output into `w`.
    async fn run_pod(&self, pod: PodSpec, a: &Attempt, w: &mut Output) -> std::result::Result<(), PodFailure> {
        let name = pod.name.clone();
        let run = self.k8s.pod_run(pod, a.cancel.clone());
        match run.stream_into(w).await {
            Ok(0) => Ok(()),
            Ok(code) => {
                error!("Pod {} of deploy {} exited with code {}", name, a.id, code);
                Err(PodFailure::Exit(code))
            }
            Err(err) => {
                error!("Pod {} of deploy {} did not complete: {}", name, a.id, err);
                Err(PodFailure::Run(err))
            }
        }
    }
}
