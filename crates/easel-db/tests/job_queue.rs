//! Queue semantics: claim atomicity, the status state machine, progress
//! monotonicity, and pagination.

mod common;

use easel_core::status::{JobStatus, JobType};
use easel_db::models::job::{JobListQuery, NewJob};
use easel_db::repositories::{ImageRepo, JobRepo};

fn job_for(model: &str) -> NewJob {
    let mut job = NewJob::new(JobType::Generate, model);
    job.prompt = Some("a cat".into());
    job.size = Some("512x512".into());
    job
}

#[tokio::test]
async fn enqueue_then_claim_oldest_first() {
    let (_dir, pool) = common::test_pool().await;

    let first = JobRepo::enqueue(&pool, &job_for("m1")).await.unwrap();
    // Keep created_at strictly ordered so the claim order is deterministic.
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = JobRepo::enqueue(&pool, &job_for("m1")).await.unwrap();
    assert_eq!(first.status, JobStatus::Pending);
    assert_eq!(first.progress, 0.0);

    let claimed = JobRepo::claim_next(&pool).await.unwrap().expect("a job");
    assert_eq!(claimed.id, first.id);
    assert_eq!(claimed.status, JobStatus::Processing);
    assert!(claimed.started_at.is_some());

    let claimed = JobRepo::claim_next(&pool).await.unwrap().expect("a job");
    assert_eq!(claimed.id, second.id);

    assert!(JobRepo::claim_next(&pool).await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_loops_claim_each_job_once() {
    let (_dir, pool) = common::test_pool().await;

    for _ in 0..10 {
        JobRepo::enqueue(&pool, &job_for("m1")).await.unwrap();
    }

    // Two drain loops racing over the same store.
    let drain = |pool: easel_db::DbPool| async move {
        let mut claimed = Vec::new();
        while let Some(job) = JobRepo::claim_next(&pool).await.unwrap() {
            claimed.push(job.id);
            tokio::task::yield_now().await;
        }
        claimed
    };

    let (a, b) = tokio::join!(
        tokio::spawn(drain(pool.clone())),
        tokio::spawn(drain(pool.clone())),
    );
    let (mut a, b) = (a.unwrap(), b.unwrap());

    a.extend(b);
    a.sort();
    let total = a.len();
    a.dedup();
    assert_eq!(total, 10, "every job claimed");
    assert_eq!(a.len(), 10, "no job claimed twice");

    let counts = JobRepo::queue_counts(&pool).await.unwrap();
    assert_eq!(counts.pending, 0);
    assert_eq!(counts.processing, 10);
}

#[tokio::test]
async fn complete_records_progress_and_timing() {
    let (_dir, pool) = common::test_pool().await;
    let job = JobRepo::enqueue(&pool, &job_for("m1")).await.unwrap();
    JobRepo::claim_next(&pool).await.unwrap().unwrap();

    JobRepo::set_model_loading_time(&pool, &job.id, 1200).await.unwrap();
    let done = JobRepo::complete(&pool, &job.id, 3400).await.unwrap();

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.progress, 1.0);
    assert_eq!(done.model_loading_time_ms, Some(1200));
    assert_eq!(done.generation_time_ms, Some(3400));
    assert!(done.completed_at.is_some());
}

#[tokio::test]
async fn fail_records_error() {
    let (_dir, pool) = common::test_pool().await;
    let job = JobRepo::enqueue(&pool, &job_for("missing-model")).await.unwrap();
    JobRepo::claim_next(&pool).await.unwrap().unwrap();

    let failed = JobRepo::fail(&pool, &job.id, "UnknownModel: missing-model")
        .await
        .unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("UnknownModel: missing-model"));
}

#[tokio::test]
async fn cancel_only_from_pending() {
    let (_dir, pool) = common::test_pool().await;

    let pending = JobRepo::enqueue(&pool, &job_for("m1")).await.unwrap();
    assert!(JobRepo::cancel(&pool, &pending.id).await.unwrap());
    let row = JobRepo::find_by_id(&pool, &pending.id).await.unwrap().unwrap();
    assert_eq!(row.status, JobStatus::Cancelled);

    // A processing job refuses cancellation.
    let running = JobRepo::enqueue(&pool, &job_for("m1")).await.unwrap();
    JobRepo::claim_next(&pool).await.unwrap().unwrap();
    assert!(!JobRepo::cancel(&pool, &running.id).await.unwrap());

    // Cancelled jobs are skipped by the claim.
    assert!(JobRepo::claim_next(&pool).await.unwrap().is_none());
}

#[tokio::test]
async fn terminal_transitions_are_rejected() {
    let (_dir, pool) = common::test_pool().await;
    let job = JobRepo::enqueue(&pool, &job_for("m1")).await.unwrap();
    JobRepo::claim_next(&pool).await.unwrap().unwrap();
    JobRepo::complete(&pool, &job.id, 10).await.unwrap();

    assert!(JobRepo::fail(&pool, &job.id, "late error").await.is_err());
    assert!(JobRepo::complete(&pool, &job.id, 10).await.is_err());
}

#[tokio::test]
async fn progress_never_decreases() {
    let (_dir, pool) = common::test_pool().await;
    let job = JobRepo::enqueue(&pool, &job_for("m1")).await.unwrap();

    JobRepo::set_progress(&pool, &job.id, 0.7).await.unwrap();
    JobRepo::set_progress(&pool, &job.id, 0.3).await.unwrap();

    let row = JobRepo::find_by_id(&pool, &job.id).await.unwrap().unwrap();
    assert_eq!(row.progress, 0.7);
}

#[tokio::test]
async fn listing_is_newest_first_with_pagination() {
    let (_dir, pool) = common::test_pool().await;
    for _ in 0..5 {
        JobRepo::enqueue(&pool, &job_for("m1")).await.unwrap();
        // created_at has second-level textual ordering plus id tiebreak; a
        // short sleep keeps the timestamps strictly ordered.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let (page, total) = JobRepo::list(
        &pool,
        &JobListQuery {
            status: None,
            limit: Some(2),
            offset: Some(0),
        },
    )
    .await
    .unwrap();
    assert_eq!(total, 5);
    assert_eq!(page.len(), 2);
    assert!(page[0].created_at >= page[1].created_at);

    let (filtered, total_pending) = JobRepo::list(
        &pool,
        &JobListQuery {
            status: Some(JobStatus::Pending),
            limit: None,
            offset: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(total_pending, 5);
    assert_eq!(filtered.len(), 5);
}

#[tokio::test]
async fn images_cascade_with_job_delete() {
    let (_dir, pool) = common::test_pool().await;
    let job = JobRepo::enqueue(&pool, &job_for("m1")).await.unwrap();

    let image = ImageRepo::append(
        &pool,
        &easel_db::models::image::NewImage {
            job_id: job.id.clone(),
            image_data: vec![0x89, 0x50, 0x4e, 0x47],
            mime_type: "image/png".into(),
            image_index: 0,
            revised_prompt: None,
            width: Some(512),
            height: Some(512),
        },
    )
    .await
    .unwrap();

    let metas = ImageRepo::list_meta_by_job(&pool, &job.id).await.unwrap();
    assert_eq!(metas.len(), 1);
    assert_eq!(metas[0].url, format!("/images/{}", image.id));

    assert!(JobRepo::delete(&pool, &job.id).await.unwrap());
    assert!(ImageRepo::find_by_id(&pool, image.id).await.unwrap().is_none());
}
