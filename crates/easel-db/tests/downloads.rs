//! Download record bookkeeping: creation with file rows, aggregate math
//! persistence, terminal states, and cleanup.

mod common;

use chrono::Duration;
use easel_core::status::DownloadStatus;
use easel_db::models::download::NewDownloadFile;
use easel_db::repositories::DownloadRepo;

fn two_files() -> Vec<NewDownloadFile> {
    vec![
        NewDownloadFile {
            remote_path: "model.safetensors".into(),
            dest_path: "/tmp/models/repo/model.safetensors".into(),
            total_bytes: Some(1000),
        },
        NewDownloadFile {
            remote_path: "vae/vae.safetensors".into(),
            dest_path: "/tmp/models/repo/vae/vae.safetensors".into(),
            total_bytes: Some(500),
        },
    ]
}

#[tokio::test]
async fn create_persists_record_and_files() {
    let (_dir, pool) = common::test_pool().await;

    let download = DownloadRepo::create(&pool, "acme/sd-turbo", &two_files())
        .await
        .unwrap();

    assert_eq!(download.status, DownloadStatus::Downloading);
    assert_eq!(download.total_bytes, 1500);
    assert_eq!(download.bytes_downloaded, 0);
    assert!(download.started_at.is_some());

    let files = DownloadRepo::files(&pool, &download.id).await.unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].remote_path, "model.safetensors");
    assert!(!files[0].complete);
}

#[tokio::test]
async fn aggregate_tracks_per_file_sum() {
    let (_dir, pool) = common::test_pool().await;
    let download = DownloadRepo::create(&pool, "acme/sd-turbo", &two_files())
        .await
        .unwrap();
    let files = DownloadRepo::files(&pool, &download.id).await.unwrap();

    DownloadRepo::update_file(&pool, files[0].id, 600, 1000).await.unwrap();
    DownloadRepo::update_file(&pool, files[1].id, 100, 500).await.unwrap();

    let files = DownloadRepo::files(&pool, &download.id).await.unwrap();
    let summed: i64 = files.iter().map(|f| f.downloaded_bytes).sum();
    assert_eq!(summed, 700);

    DownloadRepo::update_aggregate(&pool, &download.id, summed, 1500, Some(2048), Some(12))
        .await
        .unwrap();
    let row = DownloadRepo::find_by_id(&pool, &download.id).await.unwrap().unwrap();
    assert_eq!(row.bytes_downloaded, 700);
    assert_eq!(row.speed_bps, Some(2048));
    assert_eq!(row.eta_secs, Some(12));
}

#[tokio::test]
async fn mark_file_complete_clamps_to_total() {
    let (_dir, pool) = common::test_pool().await;
    let download = DownloadRepo::create(&pool, "acme/sd-turbo", &two_files())
        .await
        .unwrap();
    let files = DownloadRepo::files(&pool, &download.id).await.unwrap();

    DownloadRepo::update_file(&pool, files[0].id, 990, 1000).await.unwrap();
    DownloadRepo::mark_file_complete(&pool, files[0].id).await.unwrap();

    let files = DownloadRepo::files(&pool, &download.id).await.unwrap();
    assert!(files[0].complete);
    assert_eq!(files[0].downloaded_bytes, 1000);
    assert_eq!(files[0].progress(), 1.0);
}

#[tokio::test]
async fn failed_download_records_error_and_completion_time() {
    let (_dir, pool) = common::test_pool().await;
    let download = DownloadRepo::create(&pool, "acme/sd-turbo", &two_files())
        .await
        .unwrap();

    DownloadRepo::set_status(
        &pool,
        &download.id,
        DownloadStatus::Failed,
        Some("connection reset by peer"),
    )
    .await
    .unwrap();

    let row = DownloadRepo::find_by_id(&pool, &download.id).await.unwrap().unwrap();
    assert_eq!(row.status, DownloadStatus::Failed);
    assert_eq!(row.error.as_deref(), Some("connection reset by peer"));
    assert!(row.completed_at.is_some());
}

#[tokio::test]
async fn cleanup_removes_only_old_terminal_records() {
    let (_dir, pool) = common::test_pool().await;

    let done = DownloadRepo::create(&pool, "acme/old", &two_files()).await.unwrap();
    DownloadRepo::set_status(&pool, &done.id, DownloadStatus::Completed, None)
        .await
        .unwrap();

    let active = DownloadRepo::create(&pool, "acme/active", &two_files())
        .await
        .unwrap();

    // Nothing is older than an hour yet.
    assert_eq!(
        DownloadRepo::cleanup_older_than(&pool, Duration::hours(1)).await.unwrap(),
        0
    );

    // With a zero retention, the terminal record goes and the active one stays.
    let removed = DownloadRepo::cleanup_older_than(&pool, Duration::zero())
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(DownloadRepo::find_by_id(&pool, &done.id).await.unwrap().is_none());
    assert!(DownloadRepo::files(&pool, &done.id).await.unwrap().is_empty());
    assert!(DownloadRepo::find_by_id(&pool, &active.id).await.unwrap().is_some());
}
