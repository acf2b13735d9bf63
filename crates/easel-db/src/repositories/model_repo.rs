//! Repository for the `models` mirror table.

use chrono::Utc;

use crate::models::model::{ModelRow, UpsertModel};
use crate::DbPool;

const COLUMNS: &str = "\
    id, name, description, exec_mode, load_mode, api_url, port, \
    capabilities, registry_repo, updated_at";

/// Keeps the `models` table in sync with the config document.
pub struct ModelRepo;

impl ModelRepo {
    /// Insert or refresh one descriptor snapshot.
    pub async fn upsert(pool: &DbPool, input: &UpsertModel) -> Result<ModelRow, sqlx::Error> {
        let capabilities =
            serde_json::to_string(&input.capabilities).unwrap_or_else(|_| "[]".to_string());

        let query = format!(
            "INSERT INTO models \
                 (id, name, description, exec_mode, load_mode, api_url, port, \
                  capabilities, registry_repo, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
             ON CONFLICT (id) DO UPDATE SET \
                 name = excluded.name, \
                 description = excluded.description, \
                 exec_mode = excluded.exec_mode, \
                 load_mode = excluded.load_mode, \
                 api_url = excluded.api_url, \
                 port = excluded.port, \
                 capabilities = excluded.capabilities, \
                 registry_repo = excluded.registry_repo, \
                 updated_at = excluded.updated_at \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ModelRow>(&query)
            .bind(&input.id)
            .bind(&input.name)
            .bind(&input.description)
            .bind(input.exec_mode)
            .bind(input.load_mode)
            .bind(&input.api_url)
            .bind(input.port)
            .bind(capabilities)
            .bind(&input.registry_repo)
            .bind(Utc::now())
            .fetch_one(pool)
            .await
    }

    /// List all mirrored models.
    pub async fn list(pool: &DbPool) -> Result<Vec<ModelRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM models ORDER BY id ASC");
        sqlx::query_as::<_, ModelRow>(&query).fetch_all(pool).await
    }

    /// Remove mirror rows whose ids no longer appear in the config.
    pub async fn retain(pool: &DbPool, keep_ids: &[String]) -> Result<u64, sqlx::Error> {
        let placeholders = (1..=keep_ids.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let query = if keep_ids.is_empty() {
            "DELETE FROM models".to_string()
        } else {
            format!("DELETE FROM models WHERE id NOT IN ({placeholders})")
        };

        let mut q = sqlx::query(&query);
        for id in keep_ids {
            q = q.bind(id);
        }
        let result = q.execute(pool).await?;
        Ok(result.rows_affected())
    }
}
