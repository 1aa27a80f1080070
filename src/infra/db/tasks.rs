use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{RepoError, TasksRepo},
    domain::{
        entities::{DurableTaskRecord, NewDurableTask},
        types::FinishedStatus,
    },
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    user_id: Uuid,
    pdf_url: Option<String>,
    status: FinishedStatus,
    error: Option<String>,
    created_at: OffsetDateTime,
    updated_at: Option<OffsetDateTime>,
}

impl From<TaskRow> for DurableTaskRecord {
    fn from(row: TaskRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            pdf_url: row.pdf_url,
            status: row.status,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl TasksRepo for PostgresRepositories {
    async fn create_task(&self, task: NewDurableTask) -> Result<DurableTaskRecord, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            INSERT INTO tasks (id, user_id, pdf_url, status, error)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, user_id, pdf_url, status, error, created_at, updated_at
            "#,
        )
        .bind(task.id)
        .bind(task.user_id)
        .bind(task.pdf_url)
        .bind(task.status)
        .bind(task.error)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(row.into())
    }

    async fn find_task(&self, id: Uuid) -> Result<Option<DurableTaskRecord>, RepoError> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, user_id, pdf_url, status, error, created_at, updated_at
            FROM tasks
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(DurableTaskRecord::from))
    }

    async fn list_tasks_for_owner(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<DurableTaskRecord>, RepoError> {
        let rows = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, user_id, pdf_url, status, error, created_at, updated_at
            FROM tasks
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(DurableTaskRecord::from).collect())
    }

    async fn delete_task(&self, id: Uuid) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }
}
