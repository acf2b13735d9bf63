//! The job processor.
//!
//! A single cooperative worker that polls the job store on a fixed
//! interval, claims at most one job at a time, resolves the model, ensures
//! its engine is up, dispatches over HTTP or CLI, persists the resulting
//! images, and reports progress at the fixed checkpoints
//! `0.1, 0.3, 0.7, 0.9, 1.0`. Failures mark the job and the loop moves on.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use easel_core::params::{self, EffectiveParams};
use easel_core::status::{ExecMode, JobType};
use easel_db::models::image::NewImage;
use easel_db::models::job::Job;
use easel_db::repositories::{ImageRepo, JobRepo};
use easel_db::DbPool;
use easel_engine::cli::CliInvocation;
use easel_engine::server_api::{
    append_side_channel, decode_b64_image, encode_b64_image, EngineApi, GenerationRequest,
    UpscaleRequest,
};
use easel_engine::{EngineError, ModelDescriptor, ModelManager};
use easel_events::{Event, EventBus, Topic};
use tokio_util::sync::CancellationToken;

/// All generated images come back from the engines as PNG.
const IMAGE_MIME: &str = "image/png";

/// Fixed upscaling request shape for the `extra-single-image` endpoint.
const UPSCALE_RESIZE_MODE: i64 = 0;
const UPSCALE_FACTOR: f64 = 2.0;
const UPSCALER_NAME: &str = "RealESRGAN_x4plus";

/// One decoded engine output awaiting persistence.
struct DispatchedImage {
    bytes: Vec<u8>,
    revised_prompt: Option<String>,
}

/// Everything that can sink a single job. The `Display` text becomes the
/// job's recorded error, leading with the kind.
#[derive(Debug, thiserror::Error)]
enum ProcessError {
    /// The job is missing a field its type requires.
    #[error("JobInvalid: {0}")]
    JobInvalid(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("IOError: {0}")]
    Io(#[from] std::io::Error),

    #[error("DBError: {0}")]
    Db(#[from] sqlx::Error),
}

/// Polls the store and executes jobs one at a time.
pub struct JobProcessor {
    pool: DbPool,
    manager: Arc<ModelManager>,
    events: Arc<EventBus>,
    poll_interval: Duration,
}

impl JobProcessor {
    pub fn new(
        pool: DbPool,
        manager: Arc<ModelManager>,
        events: Arc<EventBus>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            pool,
            manager,
            events,
            poll_interval,
        }
    }

    /// Run the poll loop until the cancellation token is triggered.
    ///
    /// Jobs execute inline on this task, so a new claim can only happen
    /// once the previous job has reached a terminal status -- the
    /// at-most-one-in-flight rule by construction.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "job processor started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("job processor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::error!(error = %e, "processor tick failed");
                    }
                }
            }
        }
    }

    /// One poll cycle: claim the oldest pending job, if any, and run it.
    pub async fn tick(&self) -> Result<(), sqlx::Error> {
        let Some(job) = JobRepo::claim_next(&self.pool).await? else {
            return Ok(());
        };

        tracing::info!(job_id = %job.id, job_type = %job.job_type, model_id = %job.model_id, "job claimed");
        self.publish_queue("job.processing", &job.id, serde_json::json!({}));

        if let Err(e) = self.process(&job).await {
            tracing::warn!(job_id = %job.id, error = %e, "job failed");
            JobRepo::fail(&self.pool, &job.id, &e.to_string()).await?;
            self.publish_queue(
                "job.failed",
                &job.id,
                serde_json::json!({"error": e.to_string()}),
            );
        }
        Ok(())
    }

    /// Execute one claimed job to completion.
    async fn process(&self, job: &Job) -> Result<(), ProcessError> {
        let descriptor = self.manager.descriptor(&job.model_id)?.clone();

        // User value wins, else the model default, else the parameter is
        // omitted -- never an invented number.
        let effective = params::resolve(
            job.job_type,
            &job.requested_params(),
            &descriptor.generation_params,
        )
        .map_err(|e| ProcessError::JobInvalid(e.to_string()))?;

        self.publish_progress(&job.id, 0.1).await;

        let load_started = Instant::now();
        let api_url = self.manager.ensure_running(&job.model_id).await?;
        let loading_ms = load_started.elapsed().as_millis() as i64;
        JobRepo::set_model_loading_time(&self.pool, &job.id, loading_ms).await?;
        self.publish_progress(&job.id, 0.3).await;

        let images = match descriptor.exec_mode {
            ExecMode::Server => {
                let api_url = api_url.ok_or_else(|| {
                    ProcessError::Engine(EngineError::ModelStartFailure(format!(
                        "server model '{}' resolved no api url",
                        job.model_id
                    )))
                })?;
                self.dispatch_http(job, &effective, &api_url).await?
            }
            ExecMode::Cli => self.dispatch_cli(job, &effective, &descriptor).await?,
        };

        self.publish_progress(&job.id, 0.7).await;

        for (index, image) in images.iter().enumerate() {
            let record = ImageRepo::append(
                &self.pool,
                &NewImage {
                    job_id: job.id.clone(),
                    image_data: image.bytes.clone(),
                    mime_type: IMAGE_MIME.to_string(),
                    image_index: index as i64,
                    revised_prompt: image.revised_prompt.clone(),
                    width: effective.width.map(i64::from),
                    height: effective.height.map(i64::from),
                },
            )
            .await?;
            self.events.publish(
                Event::new(Topic::Generations, "image.created").with_payload(serde_json::json!({
                    "job_id": job.id,
                    "image_id": record.id,
                    "image_index": record.image_index,
                    "url": format!("/images/{}", record.id),
                })),
            );
        }

        self.publish_progress(&job.id, 0.9).await;

        // Time spent generating, net of model startup.
        let generation_ms = job
            .started_at
            .map(|started| (Utc::now() - started).num_milliseconds() - loading_ms)
            .unwrap_or(0)
            .max(0);
        JobRepo::complete(&self.pool, &job.id, generation_ms).await?;
        self.publish_progress(&job.id, 1.0).await;
        self.publish_queue(
            "job.completed",
            &job.id,
            serde_json::json!({"images": images.len(), "generation_time_ms": generation_ms}),
        );
        tracing::info!(job_id = %job.id, images = images.len(), "job completed");
        Ok(())
    }

    /// Dispatch over the engine's HTTP API.
    async fn dispatch_http(
        &self,
        job: &Job,
        effective: &EffectiveParams,
        api_url: &str,
    ) -> Result<Vec<DispatchedImage>, ProcessError> {
        let api = EngineApi::new(api_url.to_string());

        if job.job_type == JobType::Upscale {
            let source = job.source_image.as_deref().ok_or_else(|| {
                ProcessError::JobInvalid("upscale requires a source image".into())
            })?;
            let response = api
                .upscale(&UpscaleRequest {
                    image: encode_b64_image(source),
                    resize_mode: UPSCALE_RESIZE_MODE,
                    upscaling_resize: UPSCALE_FACTOR,
                    upscaler_1: UPSCALER_NAME.to_string(),
                })
                .await?;
            return Ok(vec![DispatchedImage {
                bytes: decode_b64_image(&response.image)?,
                revised_prompt: None,
            }]);
        }

        // Advanced parameters the engine only takes out-of-band ride the
        // prompt suffix; steps additionally goes in the body natively.
        let mut extras = serde_json::Map::new();
        if let Some(steps) = effective.sample_steps {
            extras.insert("sample_steps".into(), steps.into());
        }
        if let Some(cfg) = effective.cfg_scale {
            extras.insert("cfg_scale".into(), cfg.into());
        }
        if let Some(method) = &effective.sampling_method {
            extras.insert("sampling_method".into(), method.as_str().into());
        }
        if let Some(clip_skip) = effective.clip_skip {
            extras.insert("clip_skip".into(), clip_skip.into());
        }

        let prompt = append_side_channel(job.prompt.as_deref().unwrap_or_default(), &extras);

        let needs_source = matches!(job.job_type, JobType::Edit | JobType::Variation);
        let image = match (&job.source_image, needs_source) {
            (Some(bytes), _) => Some(encode_b64_image(bytes)),
            (None, true) => {
                return Err(ProcessError::JobInvalid(format!(
                    "{} requires a source image",
                    job.job_type
                )));
            }
            (None, false) => None,
        };

        let request = GenerationRequest {
            prompt,
            negative_prompt: job.negative_prompt.clone(),
            width: effective.width,
            height: effective.height,
            n: effective.n,
            seed: effective.seed,
            steps: effective.sample_steps,
            cfg_scale: effective.cfg_scale,
            sampler: effective.sampling_method.clone(),
            strength: effective.strength,
            image,
            mask: job.mask_image.as_deref().map(encode_b64_image),
        };

        let response = api.images(job.job_type, &request).await.map_err(ProcessError::Engine)?;
        if response.data.is_empty() {
            return Err(EngineError::EngineBadResponse("engine returned no images".into()).into());
        }

        response
            .data
            .into_iter()
            .map(|datum| {
                Ok(DispatchedImage {
                    bytes: decode_b64_image(&datum.b64_json)?,
                    revised_prompt: datum.revised_prompt,
                })
            })
            .collect()
    }

    /// Dispatch through a one-shot CLI invocation.
    async fn dispatch_cli(
        &self,
        job: &Job,
        effective: &EffectiveParams,
        descriptor: &ModelDescriptor,
    ) -> Result<Vec<DispatchedImage>, ProcessError> {
        let work_dir = std::env::temp_dir().join("easel").join(&job.id);
        tokio::fs::create_dir_all(&work_dir).await?;

        let result = self
            .run_cli_in(job, effective, descriptor, &work_dir)
            .await;

        // The work dir only holds per-job scratch files.
        let _ = tokio::fs::remove_dir_all(&work_dir).await;
        result
    }

    async fn run_cli_in(
        &self,
        job: &Job,
        effective: &EffectiveParams,
        descriptor: &ModelDescriptor,
        work_dir: &std::path::Path,
    ) -> Result<Vec<DispatchedImage>, ProcessError> {
        let needs_source = matches!(
            job.job_type,
            JobType::Edit | JobType::Variation | JobType::Upscale
        );

        let init_img: Option<PathBuf> = match (&job.source_image, needs_source) {
            (Some(bytes), _) => {
                let path = work_dir.join("init.png");
                tokio::fs::write(&path, bytes).await?;
                Some(path)
            }
            (None, true) => {
                return Err(ProcessError::JobInvalid(format!(
                    "{} requires a source image",
                    job.job_type
                )));
            }
            (None, false) => None,
        };

        let mask: Option<PathBuf> = match &job.mask_image {
            Some(bytes) => {
                let path = work_dir.join("mask.png");
                tokio::fs::write(&path, bytes).await?;
                Some(path)
            }
            None => None,
        };

        let invocation = CliInvocation {
            job_type: job.job_type,
            prompt: job.prompt.clone(),
            negative_prompt: job.negative_prompt.clone(),
            width: effective.width,
            height: effective.height,
            seed: effective.seed,
            steps: params::cli_steps(effective.sample_steps, job.quality.as_deref()),
            strength: effective.strength,
            init_img,
            mask,
            output: work_dir.join("out.png"),
        };

        let bytes = easel_engine::cli::run(descriptor, &invocation).await?;
        Ok(vec![DispatchedImage {
            bytes,
            revised_prompt: None,
        }])
    }

    /// Persist progress (monotone) and publish it on the queue topic.
    async fn publish_progress(&self, job_id: &str, progress: f64) {
        if let Err(e) = JobRepo::set_progress(&self.pool, job_id, progress).await {
            tracing::error!(job_id, error = %e, "cannot persist progress");
        }
        self.publish_queue(
            "job.progress",
            job_id,
            serde_json::json!({"progress": progress}),
        );
    }

    fn publish_queue(&self, event_type: &str, job_id: &str, mut payload: serde_json::Value) {
        if let Some(object) = payload.as_object_mut() {
            object.insert("job_id".into(), job_id.into());
        }
        self.events
            .publish(Event::new(Topic::Queue, event_type).with_payload(payload));
    }
}
