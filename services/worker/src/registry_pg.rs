use async_trait::async_trait;
use chrono::Utc;
use registry::{ModelEntry, ModelId, ModelRegistry, RegistryError, Result, StatusUpdate};
use sqlx::{types::Json, PgPool};
use tracing::debug;

/// Attempts before a contended `update_status` gives up.
const MAX_CAS_ATTEMPTS: usize = 8;

/// Registry backed by the `model_registry` table. Status updates are
/// optimistic: read, apply the transition, then write only if `version`
/// is unchanged.
#[derive(Clone)]
pub struct PgModelRegistry {
    pool: PgPool,
}

impl PgModelRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load(&self, model_id: ModelId) -> Result<Option<ModelEntry>> {
        let row: Option<(Json<ModelEntry>,)> =
            sqlx::query_as(r#"SELECT entry FROM model_registry WHERE model_id = $1"#)
                .bind(model_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage)?;
        Ok(row.map(|(Json(entry),)| entry))
    }
}

fn storage(e: sqlx::Error) -> RegistryError {
    RegistryError::Storage(e.to_string())
}

#[async_trait]
impl ModelRegistry for PgModelRegistry {
    async fn get_or_create(&self, model_id: ModelId) -> Result<ModelEntry> {
        let fresh = ModelEntry::new(model_id, Utc::now());
        sqlx::query(
            r#"
            INSERT INTO model_registry (model_id, status, version, entry, created_time)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (model_id) DO NOTHING
            "#
        )
        .bind(model_id)
        .bind(fresh.status.as_str())
        .bind(fresh.version as i64)
        .bind(Json(&fresh))
        .bind(fresh.created_time)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        // A concurrent delete can remove the row between the two statements.
        self.load(model_id).await?.ok_or(RegistryError::NotFound(model_id))
    }

    async fn get(&self, model_id: ModelId) -> Result<Option<ModelEntry>> {
        self.load(model_id).await
    }

    async fn update_status(&self, model_id: ModelId, update: StatusUpdate) -> Result<ModelEntry> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let mut entry = self.load(model_id).await?.ok_or(RegistryError::NotFound(model_id))?;
            let expected = entry.version;
            entry.apply(&update, Utc::now())?;

            let res = sqlx::query(
                r#"
                UPDATE model_registry
                SET status = $2, version = $3, entry = $4, updated_at = NOW()
                WHERE model_id = $1 AND version = $5
                "#
            )
            .bind(model_id)
            .bind(entry.status.as_str())
            .bind(entry.version as i64)
            .bind(Json(&entry))
            .bind(expected as i64)
            .execute(&self.pool)
            .await
            .map_err(storage)?;

            if res.rows_affected() == 1 {
                return Ok(entry);
            }
            debug!(model_id=%model_id, attempt, "registry: version changed underneath, retrying");
        }

        Err(RegistryError::Storage(format!(
            "model {model_id}: update lost {MAX_CAS_ATTEMPTS} consecutive races"
        )))
    }

    async fn delete(&self, model_id: ModelId) -> Result<()> {
        let res = sqlx::query(r#"DELETE FROM model_registry WHERE model_id = $1"#)
            .bind(model_id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        if res.rows_affected() == 0 {
            return Err(RegistryError::NotFound(model_id));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ModelEntry>> {
        let rows: Vec<(Json<ModelEntry>,)> =
            sqlx::query_as(r#"SELECT entry FROM model_registry ORDER BY created_time ASC"#)
                .fetch_all(&self.pool)
                .await
                .map_err(storage)?;
        Ok(rows.into_iter().map(|(Json(e),)| e).collect())
    }
}
