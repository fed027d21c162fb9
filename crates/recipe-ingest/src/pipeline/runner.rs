use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::job::{Job, JobStatus, JobUpdate};
use crate::recipe::{NewRecipe, Recipe};
use crate::services::{
    extract_hashtags, select_media, ExtractionRequest, MediaDownloader, MediaUploader,
    RecipeExtractor, Scraper,
};
use crate::store::{JobStore, RecipeStore, StoreError};

use super::config::PipelineConfig;
use super::context::PipelineContext;
use super::error::PipelineError;
use super::retry::{run_stage, CancellationCheck, RetryPolicy};
use super::stage::{stage_started_patch, transition, PIPELINE_STAGES};

/// Metadata keys written on failure.
pub const FAILED_STAGE_KEY: &str = "failed_stage";
pub const ERROR_KEY: &str = "error";

/// External collaborators called by the stages.
#[derive(Clone)]
pub struct Services {
    pub scraper: Arc<dyn Scraper>,
    pub downloader: Arc<dyn MediaDownloader>,
    pub uploader: Arc<dyn MediaUploader>,
    pub extractor: Arc<dyn RecipeExtractor>,
}

#[derive(Clone)]
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    jobs: Arc<dyn JobStore>,
    recipes: Arc<dyn RecipeStore>,
    services: Services,
}

impl Pipeline {
    pub fn new(
        config: Arc<PipelineConfig>,
        jobs: Arc<dyn JobStore>,
        recipes: Arc<dyn RecipeStore>,
        services: Services,
    ) -> Self {
        Self {
            config,
            jobs,
            recipes,
            services,
        }
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    /// Runs job `job_id` to `ready` or `failed` and returns its recipe.
    ///
    /// A job that is already `ready` returns its existing recipe without
    /// calling any collaborator. Temp media is deleted on every exit path.
    pub async fn run(&self, job_id: &str) -> Result<Recipe, PipelineError> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))?;

        let span = info_span!("pipeline", job_id = %job.id, url = %job.input_url);
        self.run_job(job).instrument(span).await
    }

    async fn run_job(&self, job: Job) -> Result<Recipe, PipelineError> {
        if let Some(recipe) = self.resume(&job).await? {
            info!("Job already ready, returning recipe {}", recipe.id);
            return Ok(recipe);
        }

        let mut ctx = PipelineContext::new(&job);
        let result = self.run_stages(&mut ctx).await;
        let outcome = match result {
            Ok(recipe) => {
                info!(recipe_id = %recipe.id, "Import completed");
                Ok(recipe)
            }
            Err(e) if e.is_cancelled() => {
                info!("Import cancelled during {}", ctx.stage);
                Err(e)
            }
            Err(e @ PipelineError::Overtaken { .. }) => {
                warn!("Stopping run: {}", e);
                Err(e)
            }
            Err(e) => {
                error!("Import failed during {}: {}", ctx.stage, e);
                self.record_failure(&ctx, &e).await;
                Err(e)
            }
        };

        ctx.cleanup().await;
        outcome
    }

    /// Short-circuits jobs that are already terminal.
    async fn resume(&self, job: &Job) -> Result<Option<Recipe>, PipelineError> {
        match job.status {
            JobStatus::Ready => {
                let recipe_id = job
                    .recipe_id
                    .as_deref()
                    .ok_or_else(|| PipelineError::MissingRecipe(job.id.clone()))?;
                self.recipes
                    .get(recipe_id)
                    .await?
                    .map(Some)
                    .ok_or_else(|| PipelineError::MissingRecipe(job.id.clone()))
            }
            JobStatus::Failed if job.is_cancelled() => {
                Err(PipelineError::Cancelled(job.id.clone()))
            }
            JobStatus::Failed => Err(PipelineError::AlreadyFailed {
                id: job.id.clone(),
                error: job.error.clone().unwrap_or_default(),
            }),
            _ => Ok(None),
        }
    }

    async fn run_stages(&self, ctx: &mut PipelineContext) -> Result<Recipe, PipelineError> {
        let job_id = ctx.job_id.clone();
        let cancel = CancellationCheck::new(self.jobs.as_ref(), &job_id);
        let policy = self.config.retry_policy();

        for stage in PIPELINE_STAGES {
            self.advance(ctx, &cancel, stage).await?;

            let step = info_span!("stage", stage = %stage);
            match stage {
                JobStatus::Scraping => {
                    self.step_scrape(ctx, &cancel, &policy)
                        .instrument(step)
                        .await?
                }
                JobStatus::DownloadingMedia => {
                    self.step_download(ctx, &cancel, &policy)
                        .instrument(step)
                        .await?
                }
                JobStatus::UploadingMedia => {
                    self.step_upload(ctx, &cancel, &policy)
                        .instrument(step)
                        .await?
                }
                JobStatus::Extracting => {
                    self.step_extract(ctx, &cancel, &policy)
                        .instrument(step)
                        .await?
                }
                JobStatus::Queued | JobStatus::Ready | JobStatus::Failed => {}
            }
        }

        self.step_store(ctx, &cancel).await
    }

    /// Persists the move into `stage`, together with facts gathered by the
    /// previous stage.
    ///
    /// Stages the job had already reached before this run are re-executed
    /// without moving the status back; only the metadata is written.
    async fn advance(
        &self,
        ctx: &mut PipelineContext,
        cancel: &CancellationCheck<'_>,
        stage: JobStatus,
    ) -> Result<(), PipelineError> {
        cancel.ensure_active().await?;

        let mut patch = ctx.take_pending_metadata();
        patch.extend(stage_started_patch());
        ctx.stage = stage;

        if stage.progress() <= ctx.resume_from.progress() {
            debug!(
                "Re-running {} without moving status back from {}",
                stage, ctx.resume_from
            );
            self.jobs
                .update(&ctx.job_id, JobUpdate::default().merge_metadata(patch))
                .await
                .map_err(|e| write_error(&ctx.job_id, e))?;
            return Ok(());
        }

        transition(self.jobs.as_ref(), &ctx.job_id, stage, patch)
            .await
            .map_err(|e| write_error(&ctx.job_id, e))?;
        Ok(())
    }

    async fn step_scrape(
        &self,
        ctx: &mut PipelineContext,
        cancel: &CancellationCheck<'_>,
        policy: &RetryPolicy,
    ) -> Result<(), PipelineError> {
        let scraper = self.services.scraper.as_ref();
        let url = ctx.input_url.as_str();
        let post = run_stage(policy, cancel, JobStatus::Scraping, move |_| {
            scraper.scrape(url)
        })
        .await?;

        let hashtags = extract_hashtags(&post.caption);
        ctx.note("media_count", post.media.len());
        ctx.note("hashtags", hashtags.clone());
        if let Some(owner) = &post.owner {
            ctx.note("owner_username", owner.username.clone());
        }
        ctx.hashtags = hashtags;
        ctx.post = Some(post);
        Ok(())
    }

    async fn step_download(
        &self,
        ctx: &mut PipelineContext,
        cancel: &CancellationCheck<'_>,
        policy: &RetryPolicy,
    ) -> Result<(), PipelineError> {
        let post = ctx
            .post
            .as_ref()
            .ok_or(PipelineError::MissingStageOutput(JobStatus::Scraping))?;
        let media_ref = select_media(post)
            .map_err(|source| PipelineError::Stage {
                stage: JobStatus::DownloadingMedia,
                source,
            })?
            .clone();

        let downloader = self.services.downloader.as_ref();
        let url = media_ref.url.as_str();
        let media = run_stage(policy, cancel, JobStatus::DownloadingMedia, move |_| {
            downloader.download(url)
        })
        .await?;
        ctx.track_temp_file(media.path.clone());

        ctx.note("media_type", media_ref.kind.as_str());
        ctx.note("media_url", media_ref.url.clone());
        ctx.note("mime_type", media.mime_type.clone());
        ctx.note("media_bytes", media.size);
        ctx.media_ref = Some(media_ref);
        ctx.media = Some(media);
        Ok(())
    }

    async fn step_upload(
        &self,
        ctx: &mut PipelineContext,
        cancel: &CancellationCheck<'_>,
        policy: &RetryPolicy,
    ) -> Result<(), PipelineError> {
        let media = ctx
            .media
            .as_ref()
            .ok_or(PipelineError::MissingStageOutput(JobStatus::DownloadingMedia))?;
        let uploader = self.services.uploader.as_ref();
        let (path, mime_type) = (media.path.as_path(), media.mime_type.as_str());
        let file = run_stage(policy, cancel, JobStatus::UploadingMedia, move |_| {
            uploader.upload(path, mime_type)
        })
        .await?;

        ctx.note("file_name", file.name.clone());
        ctx.file = Some(file);
        Ok(())
    }

    async fn step_extract(
        &self,
        ctx: &mut PipelineContext,
        cancel: &CancellationCheck<'_>,
        policy: &RetryPolicy,
    ) -> Result<(), PipelineError> {
        let post = ctx
            .post
            .as_ref()
            .ok_or(PipelineError::MissingStageOutput(JobStatus::Scraping))?;
        let file = ctx
            .file
            .clone()
            .ok_or(PipelineError::MissingStageOutput(JobStatus::UploadingMedia))?;
        let request = ExtractionRequest {
            file,
            caption: post.caption.clone(),
            hashtags: ctx.hashtags.clone(),
            owner_username: post.owner.as_ref().map(|o| o.username.clone()),
            source_url: ctx.input_url.clone(),
        };

        let extractor = self.services.extractor.as_ref();
        let request = &request;
        let data = run_stage(policy, cancel, JobStatus::Extracting, move |_| {
            extractor.extract(request)
        })
        .await?;

        ctx.note("recipe_title", data.title.clone());
        ctx.recipe_data = Some(data);
        Ok(())
    }

    /// Creates the recipe and marks the job `ready`.
    async fn step_store(
        &self,
        ctx: &mut PipelineContext,
        cancel: &CancellationCheck<'_>,
    ) -> Result<Recipe, PipelineError> {
        cancel.ensure_active().await?;

        let data = ctx
            .recipe_data
            .take()
            .ok_or(PipelineError::MissingStageOutput(JobStatus::Extracting))?;
        let post = ctx
            .post
            .take()
            .ok_or(PipelineError::MissingStageOutput(JobStatus::Scraping))?;
        let recipe = self
            .recipes
            .create(NewRecipe {
                job_id: ctx.job_id.clone(),
                source_url: ctx.input_url.clone(),
                caption: post.caption,
                owner_username: post.owner.map(|o| o.username),
                media_url: ctx.media_ref.as_ref().map(|m| m.url.clone()),
                hashtags: std::mem::take(&mut ctx.hashtags),
                data,
            })
            .await?;

        let update = JobUpdate::status(JobStatus::Ready)
            .with_recipe(recipe.id.clone())
            .merge_metadata(ctx.take_pending_metadata())
            .with_metadata("completed_at", Utc::now().to_rfc3339());
        self.jobs
            .update(&ctx.job_id, update)
            .await
            .map_err(|e| write_error(&ctx.job_id, e))?;
        ctx.stage = JobStatus::Ready;

        Ok(recipe)
    }

    /// Marks the job `failed` with the error and the stage it happened in.
    ///
    /// Skipped when the job already became terminal elsewhere. Store failures
    /// are logged; the caller still gets the original error.
    async fn record_failure(&self, ctx: &PipelineContext, err: &PipelineError) {
        match self.jobs.get(&ctx.job_id).await {
            Ok(Some(job)) if job.is_terminal() => return,
            Ok(None) => return,
            Ok(Some(_)) => {}
            Err(e) => warn!("Could not re-read job before recording failure: {}", e),
        }

        let stage = err.stage().unwrap_or(ctx.stage);
        let message = err.to_string();
        let update = JobUpdate::status(JobStatus::Failed)
            .with_error(message.clone())
            .with_metadata(FAILED_STAGE_KEY, stage.as_str())
            .with_metadata(ERROR_KEY, message)
            .with_metadata("failed_at", Utc::now().to_rfc3339());

        if let Err(e) = self.jobs.update(&ctx.job_id, update).await {
            error!("Failed to record failure for job {}: {}", ctx.job_id, e);
        }
    }
}

/// A write rejected because the job is already terminal means someone else
/// finished it between our cancellation check and the write. A rejected
/// backward move means another run is further along.
fn write_error(job_id: &str, e: StoreError) -> PipelineError {
    match e {
        StoreError::TerminalJob { .. } => PipelineError::Cancelled(job_id.to_string()),
        StoreError::IllegalTransition {
            id,
            current,
            requested,
        } => PipelineError::Overtaken {
            id,
            current,
            requested,
        },
        e => e.into(),
    }
}
