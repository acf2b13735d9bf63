//! CLI-path dispatch: a shell stand-in engine records its argv and writes
//! the output image, letting the tests assert the exact flag contract.

use std::sync::Arc;
use std::time::Duration;

use easel_api::processor::JobProcessor;
use easel_core::status::{ExecMode, JobStatus, JobType, LoadMode};
use easel_db::models::job::NewJob;
use easel_db::repositories::{ImageRepo, JobRepo};
use easel_engine::{ModelDescriptor, ModelManager, ModelsConfig};
use easel_events::EventBus;

struct Fixture {
    _db_dir: tempfile::TempDir,
    scratch: tempfile::TempDir,
    pool: easel_db::DbPool,
    processor: JobProcessor,
}

impl Fixture {
    fn argv_file(&self) -> std::path::PathBuf {
        self.scratch.path().join("argv.txt")
    }

    async fn recorded_argv(&self) -> Vec<String> {
        let raw = tokio::fs::read_to_string(self.argv_file()).await.expect("argv file");
        raw.split_whitespace().map(str::to_string).collect()
    }
}

/// A `cli` model backed by `sh`: it logs its arguments and writes a fake
/// PNG to the `-o` path (the last argument the runner appends).
async fn fixture(default_steps: Option<u32>) -> Fixture {
    let db_dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", db_dir.path().join("easel.db").display());
    let pool = easel_db::create_pool(&url).await.unwrap();
    easel_db::run_migrations(&pool).await.unwrap();

    let scratch = tempfile::tempdir().unwrap();
    let argv_file = scratch.path().join("argv.txt");
    let script = format!(
        "for a; do last=$a; done; echo \"$@\" > {}; printf 'PNG' > \"$last\"",
        argv_file.display()
    );

    let descriptor = ModelDescriptor {
        id: "u1".into(),
        name: "CLI upscaler".into(),
        description: None,
        command: "sh".into(),
        args: vec!["-c".into(), script, "easel-cli".into()],
        api_url: None,
        load_mode: LoadMode::OnDemand,
        exec_mode: ExecMode::Cli,
        port: None,
        startup_timeout_ms: None,
        generation_params: easel_core::params::GenerationDefaults {
            sample_steps: default_steps,
            ..Default::default()
        },
        capabilities: vec![],
        registry_repo: None,
        registry_files: vec![],
    };

    let events = Arc::new(EventBus::new());
    let manager = ModelManager::new(
        ModelsConfig {
            default_model: None,
            models: vec![descriptor],
        },
        pool.clone(),
        Arc::clone(&events),
    );
    let processor = JobProcessor::new(
        pool.clone(),
        manager,
        events,
        Duration::from_millis(50),
    );

    Fixture {
        _db_dir: db_dir,
        scratch,
        pool,
        processor,
    }
}

fn count_flag(argv: &[String], flag: &str) -> usize {
    argv.iter().filter(|a| a.as_str() == flag).count()
}

#[tokio::test]
async fn upscale_argv_has_init_img_no_strength_no_steps() {
    let fx = fixture(None).await;

    let mut job = NewJob::new(JobType::Upscale, "u1");
    job.source_image = Some(b"source-bytes".to_vec());
    let job = JobRepo::enqueue(&fx.pool, &job).await.unwrap();

    fx.processor.tick().await.unwrap();

    let done = JobRepo::find_by_id(&fx.pool, &job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed, "error: {:?}", done.error);

    let argv = fx.recorded_argv().await;
    assert_eq!(count_flag(&argv, "--init-img"), 1);
    assert_eq!(count_flag(&argv, "--strength"), 0, "upscale never sends strength");
    assert_eq!(count_flag(&argv, "--steps"), 0, "no steps were provided anywhere");

    // The output the engine wrote is what got persisted.
    let images = ImageRepo::list_meta_by_job(&fx.pool, &job.id).await.unwrap();
    assert_eq!(images.len(), 1);
    let stored = ImageRepo::find_by_id(&fx.pool, images[0].id).await.unwrap().unwrap();
    assert_eq!(stored.image_data.as_deref(), Some(b"PNG".as_slice()));
}

#[tokio::test]
async fn upscale_with_explicit_steps_sends_exactly_one_flag() {
    let fx = fixture(None).await;

    let mut job = NewJob::new(JobType::Upscale, "u1");
    job.source_image = Some(b"source-bytes".to_vec());
    job.sample_steps = Some(14);
    JobRepo::enqueue(&fx.pool, &job).await.unwrap();

    fx.processor.tick().await.unwrap();

    let argv = fx.recorded_argv().await;
    assert_eq!(count_flag(&argv, "--steps"), 1);
    let pos = argv.iter().position(|a| a == "--steps").unwrap();
    assert_eq!(argv[pos + 1], "14");
}

#[tokio::test]
async fn variation_gets_default_strength_flag() {
    let fx = fixture(None).await;

    let mut job = NewJob::new(JobType::Variation, "u1");
    job.prompt = Some("p".into());
    job.source_image = Some(b"source-bytes".to_vec());
    JobRepo::enqueue(&fx.pool, &job).await.unwrap();

    fx.processor.tick().await.unwrap();

    let argv = fx.recorded_argv().await;
    let pos = argv.iter().position(|a| a == "--strength").expect("strength flag");
    assert_eq!(argv[pos + 1], "0.75");
    assert_eq!(count_flag(&argv, "--init-img"), 1);
}

#[tokio::test]
async fn quality_hint_maps_to_steps_when_nothing_resolved() {
    let fx = fixture(None).await;

    let mut job = NewJob::new(JobType::Generate, "u1");
    job.prompt = Some("a cat".into());
    job.quality = Some("hd".into());
    JobRepo::enqueue(&fx.pool, &job).await.unwrap();

    fx.processor.tick().await.unwrap();

    let argv = fx.recorded_argv().await;
    let pos = argv.iter().position(|a| a == "--steps").expect("steps from quality");
    assert_eq!(argv[pos + 1], "40");
    assert_eq!(count_flag(&argv, "--steps"), 1);
}

#[tokio::test]
async fn resolved_steps_beat_the_quality_hint() {
    let fx = fixture(Some(25)).await;

    let mut job = NewJob::new(JobType::Generate, "u1");
    job.prompt = Some("a cat".into());
    job.quality = Some("hd".into());
    JobRepo::enqueue(&fx.pool, &job).await.unwrap();

    fx.processor.tick().await.unwrap();

    let argv = fx.recorded_argv().await;
    let pos = argv.iter().position(|a| a == "--steps").unwrap();
    assert_eq!(argv[pos + 1], "25", "model default outranks the quality map");
}

#[tokio::test]
async fn missing_source_image_is_job_invalid() {
    let fx = fixture(None).await;

    let job = JobRepo::enqueue(&fx.pool, &NewJob::new(JobType::Upscale, "u1"))
        .await
        .unwrap();
    fx.processor.tick().await.unwrap();

    let failed = JobRepo::find_by_id(&fx.pool, &job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error.unwrap().starts_with("JobInvalid"));
}
