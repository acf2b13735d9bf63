//! Shared fixtures for db integration tests.

use easel_db::DbPool;

/// A migrated pool backed by a temp file. The `TempDir` guard must be kept
/// alive for the duration of the test.
pub async fn test_pool() -> (tempfile::TempDir, DbPool) {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("easel.db").display());
    let pool = easel_db::create_pool(&url).await.expect("create pool");
    easel_db::run_migrations(&pool).await.expect("migrations");
    (dir, pool)
}
